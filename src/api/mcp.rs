use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value as J};

use crate::core::mcp::{
    InitializeResult, MessageKind, RequestId, RpcMessage, ServerInfo, DEFAULT_PROTOCOL_VERSION,
    INVALID_PARAMS, METHOD_NOT_FOUND,
};
use crate::domain::ToolDefinition;
use crate::infra::runtime::mcp_transport::{MessageHandler, Responder};
use crate::tools::registry::{ToolCallError, ToolRegistry};

/// MCP protocol layer: answers initialize, ping, tools/list and tools/call.
#[derive(Clone)]
pub struct McpProtocol {
    registry: Arc<ToolRegistry>,
    server_name: String,
}

impl McpProtocol {
    pub fn new(registry: Arc<ToolRegistry>, server_name: impl Into<String>) -> Self {
        Self { registry, server_name: server_name.into() }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Response for a request; `None` for notifications and client responses.
    pub async fn respond(&self, message: RpcMessage) -> Option<RpcMessage> {
        let method = message.method.clone().unwrap_or_default();
        let id = match (message.kind(), message.id.clone()) {
            (MessageKind::Request, Some(id)) => id,
            (MessageKind::Notification, _) => {
                tracing::debug!(method = %method, "notification received");
                return None;
            }
            _ => {
                tracing::debug!(id = ?message.id, "ignoring client response");
                return None;
            }
        };
        tracing::debug!(method = %method, id = %id, "request received");

        let params = message.params.unwrap_or(J::Null);
        let resp = match method.as_str() {
            "initialize" => RpcMessage::response(id, self.initialize(&params)),
            "ping" => RpcMessage::response(id, json!({})),
            "tools/list" => RpcMessage::response(id, tools_list(&self.registry.list())),
            "tools/call" => self.call_tool(id, &params).await,
            _ => RpcMessage::error_response(id, METHOD_NOT_FOUND, format!("Method not found: {method}"), None),
        };
        Some(resp)
    }

    fn initialize(&self, params: &J) -> J {
        let protocol_version = params
            .get("protocolVersion")
            .and_then(J::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION)
            .to_string();
        let result = InitializeResult {
            protocol_version,
            capabilities: json!({"tools": {"listChanged": false}}),
            server_info: ServerInfo {
                name: self.server_name.clone(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };
        serde_json::to_value(result).unwrap_or(J::Null)
    }

    async fn call_tool(&self, id: RequestId, params: &J) -> RpcMessage {
        let Some(name) = params.get("name").and_then(J::as_str) else {
            return RpcMessage::error_response(id, INVALID_PARAMS, "missing tool name", None);
        };
        let args = match params.get("arguments") {
            None | Some(J::Null) => Map::new(),
            Some(J::Object(m)) => m.clone(),
            Some(_) => {
                return RpcMessage::error_response(id, INVALID_PARAMS, "`arguments` must be an object", None)
            }
        };

        match self.registry.call(name, args).await {
            Ok(out) => RpcMessage::response(id, tool_result(&out, false)),
            Err(ToolCallError::UnknownTool(name)) => {
                RpcMessage::error_response(id, INVALID_PARAMS, format!("Unknown tool: {name}"), None)
            }
            Err(ToolCallError::Execute(e)) => {
                tracing::warn!(tool = %name, error = %e, "tool call failed");
                RpcMessage::response(id, tool_result(&J::String(e.to_string()), true))
            }
        }
    }
}

#[async_trait]
impl MessageHandler for McpProtocol {
    async fn handle(&self, message: RpcMessage, responder: Responder) {
        if let Some(resp) = self.respond(message).await {
            if let Err(e) = responder.send(resp) {
                tracing::warn!(session_id = ?responder.session_id(), error = %e, "response not delivered");
            }
        }
    }
}

fn tools_list(tools: &[ToolDefinition]) -> J {
    let tools: Vec<J> = tools
        .iter()
        .map(|t| json!({ "name": t.name, "description": t.description, "inputSchema": t.input_schema }))
        .collect();
    json!({ "tools": tools })
}

/// `tools/call` result envelope. Strings go out as-is, anything else as
/// pretty-printed JSON.
pub fn tool_result(out: &J, is_error: bool) -> J {
    json!({
        "content": [{ "type": "text", "text": render_text(out) }],
        "isError": is_error,
    })
}

pub fn render_text(out: &J) -> String {
    match out {
        J::String(s) => s.clone(),
        J::Null => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
