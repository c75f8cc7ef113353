//! MCP over stdin/stdout through the rmcp server runtime. Shares the tool
//! registry and execution pipeline with the HTTP transport.

use std::future::Future;
use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, JsonObject, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::RequestContext;
use rmcp::{serve_server, ErrorData, RoleServer, ServerHandler};
use serde_json::Value;

use crate::api::mcp::render_text;
use crate::tools::registry::{ToolCallError, ToolRegistry};

#[derive(Clone)]
pub struct StdioGateway {
    registry: Arc<ToolRegistry>,
    server_name: String,
}

impl StdioGateway {
    pub fn new(registry: Arc<ToolRegistry>, server_name: impl Into<String>) -> Self {
        Self { registry, server_name: server_name.into() }
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.registry
            .list()
            .into_iter()
            .map(|t| {
                let schema: JsonObject = match t.input_schema {
                    Value::Object(m) => m,
                    _ => JsonObject::new(),
                };
                Tool::new(t.name, t.description, Arc::new(schema))
            })
            .collect()
    }

    pub async fn run_call(&self, name: &str, arguments: Option<JsonObject>) -> Result<CallToolResult, ErrorData> {
        match self.registry.call(name, arguments.unwrap_or_default()).await {
            Ok(out) => Ok(CallToolResult::success(vec![Content::text(render_text(&out))])),
            Err(ToolCallError::UnknownTool(name)) => {
                Err(ErrorData::invalid_params(format!("Unknown tool: {name}"), None))
            }
            Err(ToolCallError::Execute(e)) => {
                tracing::warn!(tool = name, error = %e, "tool call failed");
                Ok(CallToolResult::error(vec![Content::text(e.to_string())]))
            }
        }
    }
}

impl ServerHandler for StdioGateway {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: self.server_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(self.tools())))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move { self.run_call(&request.name, request.arguments).await }
    }
}

pub async fn serve_stdio(gateway: StdioGateway) -> anyhow::Result<()> {
    tracing::info!(server = %gateway.server_name, "serving MCP over stdio");
    let running = serve_server(gateway, (tokio::io::stdin(), tokio::io::stdout())).await?;
    let reason = running.waiting().await?;
    tracing::info!(reason = ?reason, "stdio session ended");
    Ok(())
}
