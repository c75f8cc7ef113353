//! Catalog exploration tools. They look endpoints up by path and method
//! instead of by Tool ID, so a client can reach any operation without every
//! tool being listed up front.

use serde_json::{json, Map, Value};

use crate::clients::api_client::ExecuteError;
use crate::core::tool_id::ToolId;
use crate::domain::{Endpoint, ToolDefinition};
use crate::tools::registry::{definition_for, ToolCallError, ToolRegistry};

pub const LIST_ENDPOINTS: &str = "list-api-endpoints";
pub const GET_ENDPOINT_SCHEMA: &str = "get-api-endpoint-schema";
pub const INVOKE_ENDPOINT: &str = "invoke-api-endpoint";

pub fn is_meta(name: &str) -> bool {
    matches!(name, LIST_ENDPOINTS | GET_ENDPOINT_SCHEMA | INVOKE_ENDPOINT)
}

pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            id: ToolId::from_raw(LIST_ENDPOINTS),
            name: LIST_ENDPOINTS.into(),
            description: "List the API's endpoints, optionally filtered by a search term".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "search": {"type": "string", "description": "Substring matched against path, operationId, summary and tags"}
                }
            }),
        },
        ToolDefinition {
            id: ToolId::from_raw(GET_ENDPOINT_SCHEMA),
            name: GET_ENDPOINT_SCHEMA.into(),
            description: "Get the input schema of an endpoint by path, optionally narrowed to one method".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "endpoint": {"type": "string", "description": "Path template, e.g. /users/{id}"},
                    "method": {"type": "string"}
                },
                "required": ["endpoint"]
            }),
        },
        ToolDefinition {
            id: ToolId::from_raw(INVOKE_ENDPOINT),
            name: INVOKE_ENDPOINT.into(),
            description: "Call an endpoint by path and method with the given parameters".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "endpoint": {"type": "string", "description": "Path template, e.g. /users/{id}"},
                    "method": {"type": "string"},
                    "params": {"type": "object"}
                },
                "required": ["endpoint", "method"]
            }),
        },
    ]
}

pub async fn call(registry: &ToolRegistry, name: &str, args: Map<String, Value>) -> Result<Value, ToolCallError> {
    match name {
        LIST_ENDPOINTS => Ok(list_endpoints(registry, &args)),
        GET_ENDPOINT_SCHEMA => endpoint_schema(registry, &args),
        INVOKE_ENDPOINT => invoke(registry, args).await,
        other => Err(ToolCallError::UnknownTool(other.to_string())),
    }
}

fn list_endpoints(registry: &ToolRegistry, args: &Map<String, Value>) -> Value {
    let term = args.get("search").and_then(Value::as_str).unwrap_or("");
    let endpoints: Vec<Value> = registry
        .catalog()
        .search(term)
        .into_iter()
        .map(|ep| {
            let mut entry = json!({"method": ep.method, "path": ep.path, "toolId": ep.tool_id().as_str()});
            if let Some(tool) = registry.tool_for(ep) {
                entry["name"] = Value::String(tool.name.clone());
            }
            if let Some(summary) = &ep.summary {
                entry["summary"] = Value::String(summary.clone());
            }
            entry
        })
        .collect();
    json!({"total": endpoints.len(), "endpoints": endpoints})
}

fn endpoint_schema(registry: &ToolRegistry, args: &Map<String, Value>) -> Result<Value, ToolCallError> {
    let path = required_str(args, "endpoint")?;
    let method = args.get("method").and_then(Value::as_str);
    let matches: Vec<&Endpoint> = registry
        .catalog()
        .find_path(path)
        .into_iter()
        .filter(|ep| method.map_or(true, |m| ep.method.eq_ignore_ascii_case(m)))
        .collect();
    if matches.is_empty() {
        return Err(ExecuteError::UnknownEndpoint {
            method: method.unwrap_or("*").to_ascii_uppercase(),
            path: path.to_string(),
        }
        .into());
    }
    let schemas: Vec<Value> = matches
        .into_iter()
        .map(|ep| {
            json!({
                "method": ep.method,
                "path": ep.path,
                "toolId": ep.tool_id().as_str(),
                "operationId": ep.operation_id,
                "summary": ep.summary,
                "description": ep.description,
                "inputSchema": ep.input_schema(),
            })
        })
        .collect();
    Ok(Value::Array(schemas))
}

async fn invoke(registry: &ToolRegistry, args: Map<String, Value>) -> Result<Value, ToolCallError> {
    let path = required_str(&args, "endpoint")?;
    let method = required_str(&args, "method")?;
    let params = match args.get("params") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(m)) => m.clone(),
        Some(_) => return Err(ExecuteError::InvalidArguments("`params` must be an object".into()).into()),
    };
    let endpoint = registry.catalog().find(method, path).ok_or_else(|| ExecuteError::UnknownEndpoint {
        method: method.to_ascii_uppercase(),
        path: path.to_string(),
    })?;
    let tool = registry
        .tool_for(endpoint)
        .cloned()
        .unwrap_or_else(|| definition_for(endpoint, endpoint.tool_id().to_string()));
    tracing::debug!(method = %endpoint.method, path = %endpoint.path, "invoking endpoint dynamically");
    Ok(registry.api().execute(&endpoint.method, &endpoint.path, params, Some(&tool)).await?)
}

fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ExecuteError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ExecuteError::InvalidArguments(format!("missing required string `{key}`")))
}
