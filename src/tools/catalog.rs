//! Endpoint catalog built from an OpenAPI 3 JSON document.
//!
//! Only what the gateway needs is read: operations, their parameters and a
//! JSON request body schema. `$ref`s are not resolved.

use std::collections::HashSet;
use std::path::Path;

use serde_json::{json, Value};

use crate::core::error::GatewayError;
use crate::domain::{Endpoint, ParameterLocation, ParameterSpec};

const METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch", "trace"];

#[derive(Debug, Clone, Default)]
pub struct EndpointCatalog {
    endpoints: Vec<Endpoint>,
}

impl EndpointCatalog {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Spec(format!("cannot read {}: {e}", path.display())))?;
        let doc: Value = serde_json::from_str(&raw)
            .map_err(|e| GatewayError::Spec(format!("{} is not valid JSON: {e}", path.display())))?;
        let catalog = Self::from_openapi(&doc)?;
        tracing::info!(path = %path.display(), endpoints = catalog.len(), "loaded OpenAPI document");
        Ok(catalog)
    }

    pub fn from_openapi(doc: &Value) -> Result<Self, GatewayError> {
        let paths = doc
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| GatewayError::Spec("document has no `paths` object".into()))?;

        let mut endpoints = Vec::new();
        for (path, item) in paths {
            let Some(item) = item.as_object() else { continue };
            let shared = item.get("parameters").map(parse_parameters).unwrap_or_default();

            for method in METHODS {
                let Some(op) = item.get(*method).and_then(Value::as_object) else { continue };
                let mut ep = Endpoint::new(method, path);
                ep.operation_id = op.get("operationId").and_then(Value::as_str).map(str::to_string);
                ep.summary = op.get("summary").and_then(Value::as_str).map(str::to_string);
                ep.description = op.get("description").and_then(Value::as_str).map(str::to_string);
                ep.tags = op
                    .get("tags")
                    .and_then(Value::as_array)
                    .map(|tags| tags.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default();
                let own = op.get("parameters").map(parse_parameters).unwrap_or_default();
                ep.parameters = merge_parameters(&shared, own);
                ep.request_body = op.get("requestBody").and_then(request_body_schema);
                endpoints.push(ep);
            }
        }
        Ok(Self { endpoints })
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn find(&self, method: &str, path: &str) -> Option<&Endpoint> {
        self.endpoints
            .iter()
            .find(|e| e.method.eq_ignore_ascii_case(method) && e.path == path)
    }

    pub fn find_path(&self, path: &str) -> Vec<&Endpoint> {
        self.endpoints.iter().filter(|e| e.path == path).collect()
    }

    /// Case-insensitive substring match over path, operationId, summary,
    /// description and tags. An empty term matches everything.
    pub fn search(&self, term: &str) -> Vec<&Endpoint> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return self.endpoints.iter().collect();
        }
        self.endpoints
            .iter()
            .filter(|e| {
                let hit = |s: &str| s.to_lowercase().contains(&term);
                hit(&e.path)
                    || e.operation_id.as_deref().is_some_and(hit)
                    || e.summary.as_deref().is_some_and(hit)
                    || e.description.as_deref().is_some_and(hit)
                    || e.tags.iter().any(|t| hit(t))
            })
            .collect()
    }
}

fn parse_parameters(raw: &Value) -> Vec<ParameterSpec> {
    let Some(items) = raw.as_array() else { return Vec::new() };
    items
        .iter()
        .filter_map(|p| {
            if let Some(r) = p.get("$ref").and_then(Value::as_str) {
                tracing::debug!(reference = r, "skipping unresolved parameter reference");
                return None;
            }
            let name = p.get("name")?.as_str()?;
            let location = ParameterLocation::parse(p.get("in")?.as_str()?)?;
            Some(ParameterSpec {
                name: name.to_string(),
                location,
                required: location == ParameterLocation::Path
                    || p.get("required").and_then(Value::as_bool).unwrap_or(false),
                description: p.get("description").and_then(Value::as_str).map(str::to_string),
                schema: p.get("schema").cloned().unwrap_or_else(|| json!({"type": "string"})),
            })
        })
        .collect()
}

/// Operation-level parameters override path-level ones with the same name
/// and location.
fn merge_parameters(shared: &[ParameterSpec], own: Vec<ParameterSpec>) -> Vec<ParameterSpec> {
    let overridden: HashSet<(&str, ParameterLocation)> =
        own.iter().map(|p| (p.name.as_str(), p.location)).collect();
    let mut merged: Vec<ParameterSpec> = shared
        .iter()
        .filter(|p| !overridden.contains(&(p.name.as_str(), p.location)))
        .cloned()
        .collect();
    merged.extend(own);
    merged
}

fn request_body_schema(body: &Value) -> Option<Value> {
    let content = body.get("content")?.as_object()?;
    let media = content
        .get("application/json")
        .or_else(|| content.iter().find(|(k, _)| k.ends_with("+json")).map(|(_, v)| v))
        .or_else(|| content.values().next())?;
    media.get("schema").cloned()
}
