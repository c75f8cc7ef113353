use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::clients::api_client::{ApiClient, ExecuteError};
use crate::domain::{Endpoint, ToolDefinition};
use crate::infra::config::{Config, ToolsMode};
use crate::tools::catalog::EndpointCatalog;
use crate::tools::meta;

const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error(transparent)]
    Execute(#[from] ExecuteError),
}

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub mode: ToolsMode,
    pub include_tools: Vec<String>,
    pub include_operations: Vec<String>,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self { mode: ToolsMode::All, include_tools: Vec::new(), include_operations: Vec::new() }
    }
}

impl RegistryOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            mode: cfg.tools_mode(),
            include_tools: cfg.include_tools.clone(),
            include_operations: cfg.include_operations.clone(),
        }
    }
}

/// Every tool the gateway can run: one per catalog endpoint plus the meta
/// tools. Tools are looked up by client-facing name first, then by Tool ID.
#[derive(Debug)]
pub struct ToolRegistry {
    catalog: EndpointCatalog,
    api: ApiClient,
    mode: ToolsMode,
    tools: Vec<ToolDefinition>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
    exposed: Vec<usize>,
}

impl ToolRegistry {
    pub fn new(catalog: EndpointCatalog, api: ApiClient, options: RegistryOptions) -> Self {
        let mut taken = HashSet::new();
        let tools: Vec<ToolDefinition> = catalog
            .endpoints()
            .iter()
            .map(|ep| {
                let name = unique_name(&base_name(ep), &mut taken);
                definition_for(ep, name)
            })
            .collect();

        let by_name = tools.iter().enumerate().map(|(i, t)| (t.name.clone(), i)).collect();
        let by_id = tools.iter().enumerate().map(|(i, t)| (t.id.to_string(), i)).collect();

        let methods: HashSet<String> =
            options.include_operations.iter().map(|m| m.to_ascii_uppercase()).collect();
        let wanted: HashSet<&str> = options.include_tools.iter().map(String::as_str).collect();
        let exposed = tools
            .iter()
            .enumerate()
            .filter(|(i, t)| {
                let method = &catalog.endpoints()[*i].method;
                let by_method = methods.is_empty() || methods.contains(method);
                let named = wanted.contains(t.name.as_str()) || wanted.contains(t.id.as_str());
                match options.mode {
                    ToolsMode::Dynamic => false,
                    ToolsMode::Explicit => named && by_method,
                    ToolsMode::All => (wanted.is_empty() || named) && by_method,
                }
            })
            .map(|(i, _)| i)
            .collect::<Vec<_>>();

        tracing::info!(
            endpoints = tools.len(),
            exposed = exposed.len(),
            mode = ?options.mode,
            "tool registry built"
        );

        Self { catalog, api, mode: options.mode, tools, by_name, by_id, exposed }
    }

    pub fn catalog(&self) -> &EndpointCatalog {
        &self.catalog
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn mode(&self) -> ToolsMode {
        self.mode
    }

    /// Tools advertised by `tools/list`.
    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut out: Vec<ToolDefinition> = self.exposed.iter().map(|i| self.tools[*i].clone()).collect();
        if self.mode == ToolsMode::Dynamic {
            out.extend(meta::definitions());
        }
        out
    }

    /// Every endpoint tool regardless of mode, in catalog order.
    pub fn all_endpoint_tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// The endpoint tool for a catalog entry.
    pub fn tool_for(&self, endpoint: &Endpoint) -> Option<&ToolDefinition> {
        self.by_id.get(endpoint.tool_id().as_str()).map(|i| &self.tools[*i])
    }

    /// Resolve a callable endpoint tool by name, then by Tool ID.
    pub fn get(&self, name_or_id: &str) -> Option<&ToolDefinition> {
        self.exposed_index(name_or_id).map(|i| &self.tools[i])
    }

    fn exposed_index(&self, name_or_id: &str) -> Option<usize> {
        let idx = self.by_name.get(name_or_id).or_else(|| self.by_id.get(name_or_id))?;
        self.exposed.contains(idx).then_some(*idx)
    }

    pub async fn call(&self, name: &str, args: Map<String, Value>) -> Result<Value, ToolCallError> {
        if meta::is_meta(name) {
            return meta::call(self, name, args).await;
        }
        let idx = self.exposed_index(name).ok_or_else(|| ToolCallError::UnknownTool(name.to_string()))?;
        let tool = &self.tools[idx];
        tracing::debug!(tool = %tool.name, id = %tool.id, "calling endpoint tool");
        // the catalog keeps the exact template; the decoded id may be lossy
        match self.catalog.endpoints().get(idx) {
            Some(ep) => Ok(self.api.execute(&ep.method, &ep.path, args, Some(tool)).await?),
            None => Ok(self.api.execute_tool(&tool.id, args, Some(tool)).await?),
        }
    }
}

pub(crate) fn definition_for(ep: &Endpoint, name: String) -> ToolDefinition {
    let description = ep
        .summary
        .clone()
        .or_else(|| ep.description.clone())
        .unwrap_or_else(|| format!("{} {}", ep.method, ep.path));
    ToolDefinition { id: ep.tool_id(), name, description, input_schema: ep.input_schema() }
}

fn base_name(ep: &Endpoint) -> String {
    let raw = match &ep.operation_id {
        Some(op) if !op.trim().is_empty() => op.clone(),
        _ => format!("{}-{}", ep.method.to_ascii_lowercase(), ep.path),
    };
    let mut name = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' };
        if c == '-' && name.ends_with('-') {
            continue;
        }
        name.push(c);
    }
    let name = name.trim_matches('-');
    if name.is_empty() {
        "tool".to_string()
    } else {
        truncate(name, MAX_NAME_LEN)
    }
}

fn unique_name(base: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(base.to_string()) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let suffix = format!("-{n}");
        let candidate = format!("{}{suffix}", truncate(base, MAX_NAME_LEN - suffix.len()));
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ParameterLocation;

    fn catalog() -> EndpointCatalog {
        let mut list = Endpoint::new("GET", "/pets");
        list.operation_id = Some("listPets".into());
        let show = Endpoint::new("GET", "/pets/{petId}").with_parameter("petId", ParameterLocation::Path, true);
        let mut create = Endpoint::new("POST", "/pets");
        create.operation_id = Some("list.Pets".into());
        EndpointCatalog::new(vec![list, show, create])
    }

    fn registry(options: RegistryOptions) -> ToolRegistry {
        ToolRegistry::new(catalog(), ApiClient::from_static_headers("http://localhost:1", Default::default()), options)
    }

    #[test]
    fn names_come_from_operation_ids_or_method_and_path() {
        let r = registry(RegistryOptions::default());
        let names: Vec<String> = r.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["listPets", "get-pets-petId", "list-Pets"]);
    }

    #[test]
    fn duplicate_names_get_numeric_suffix() {
        let mut taken = HashSet::new();
        assert_eq!(unique_name("a", &mut taken), "a");
        assert_eq!(unique_name("a", &mut taken), "a-2");
        assert_eq!(unique_name("a", &mut taken), "a-3");
        let long = "x".repeat(64);
        assert_eq!(unique_name(&long, &mut taken).len(), 64);
        let second = unique_name(&long, &mut taken);
        assert_eq!(second.len(), 64);
        assert!(second.ends_with("-2"));
    }

    #[test]
    fn tools_resolve_by_name_then_id() {
        let r = registry(RegistryOptions::default());
        let by_name = r.get("get-pets-petId").unwrap();
        let by_id = r.get("GET::pets---petId").unwrap();
        assert_eq!(by_name, by_id);
        assert!(r.get("nope").is_none());
    }

    #[test]
    fn dynamic_mode_lists_only_meta_tools() {
        let r = registry(RegistryOptions { mode: ToolsMode::Dynamic, ..Default::default() });
        let names: Vec<String> = r.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec![meta::LIST_ENDPOINTS, meta::GET_ENDPOINT_SCHEMA, meta::INVOKE_ENDPOINT]);
        assert!(r.get("listPets").is_none());
    }

    #[test]
    fn explicit_mode_lists_named_tools() {
        let r = registry(RegistryOptions {
            mode: ToolsMode::Explicit,
            include_tools: vec!["listPets".into(), "POST::pets".into()],
            include_operations: Vec::new(),
        });
        let names: Vec<String> = r.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["listPets", "list-Pets"]);
    }

    #[test]
    fn operation_filter_applies_in_all_mode() {
        let r = registry(RegistryOptions { include_operations: vec!["post".into()], ..Default::default() });
        let names: Vec<String> = r.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["list-Pets"]);
    }

    fn downstream(base_url: &str, endpoints: Vec<Endpoint>) -> ToolRegistry {
        ToolRegistry::new(
            EndpointCatalog::new(endpoints),
            ApiClient::from_static_headers(base_url, Default::default()),
            RegistryOptions::default(),
        )
    }

    fn args(v: serde_json::Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn calls_use_the_catalog_template() {
        use httpmock::prelude::*;
        let server = MockServer::start();
        let report = server.mock(|when, then| {
            when.method(GET).path("/reports/7.json");
            then.status(200).json_body(serde_json::json!({"id": 7}));
        });
        let package = server.mock(|when, then| {
            when.method(GET).path("/pkg/serde-1.0");
            then.status(200).body("ok");
        });
        let mut by_report = Endpoint::new("GET", "/reports/{id}.json").with_parameter("id", ParameterLocation::Path, true);
        by_report.operation_id = Some("getReport".into());
        let mut by_version = Endpoint::new("GET", "/pkg/{name}-{version}")
            .with_parameter("name", ParameterLocation::Path, true)
            .with_parameter("version", ParameterLocation::Path, true);
        by_version.operation_id = Some("getPackage".into());
        let r = downstream(&server.base_url(), vec![by_report, by_version]);

        let out = r.call("getReport", args(serde_json::json!({"id": "7"}))).await.unwrap();
        assert_eq!(out["id"], 7);
        let out = r.call("getPackage", args(serde_json::json!({"name": "serde", "version": "1.0"}))).await.unwrap();
        assert_eq!(out, "ok");
        report.assert();
        package.assert();
    }

    #[tokio::test]
    async fn root_endpoint_is_callable() {
        use httpmock::prelude::*;
        let server = MockServer::start();
        let root = server.mock(|when, then| {
            when.method(GET).path("/");
            then.status(200).body("welcome");
        });
        let mut ep = Endpoint::new("GET", "/");
        ep.operation_id = Some("root".into());
        let r = downstream(&server.base_url(), vec![ep]);

        assert_eq!(r.get("root").map(|t| t.id.as_str()), Some("GET::"));
        let out = r.call("root", Map::new()).await.unwrap();
        assert_eq!(out, "welcome");
        let out = r.api().execute_tool(&r.get("root").unwrap().id, Map::new(), None).await.unwrap();
        assert_eq!(out, "welcome");
        root.assert_hits(2);
    }

    #[tokio::test]
    async fn array_body_is_sent_as_is() {
        use httpmock::prelude::*;
        let server = MockServer::start();
        let tags = server.mock(|when, then| {
            when.method(PUT).path("/tags").json_body(serde_json::json!(["a", "b"]));
            then.status(204);
        });
        let mut ep = Endpoint::new("PUT", "/tags");
        ep.operation_id = Some("setTags".into());
        ep.request_body = Some(serde_json::json!({"type": "array", "items": {"type": "string"}}));
        let r = downstream(&server.base_url(), vec![ep]);

        r.call("setTags", args(serde_json::json!({"body": ["a", "b"]}))).await.unwrap();
        tags.assert();
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let r = registry(RegistryOptions::default());
        let err = r.call("missing", Map::new()).await.unwrap_err();
        assert!(matches!(err, ToolCallError::UnknownTool(_)));
    }
}
