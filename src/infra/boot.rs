use std::sync::Arc;

use crate::api::mcp::McpProtocol;
use crate::clients::api_client::ApiClient;
use crate::core::error::GatewayError;
use crate::infra::config::Config;
use crate::infra::runtime::mcp_transport::StreamableHttpTransport;
use crate::infra::runtime::stdio::{serve_stdio, StdioGateway};
use crate::tools::catalog::EndpointCatalog;
use crate::tools::registry::{RegistryOptions, ToolRegistry};

/// Catalog + client + registry from configuration. Both the OpenAPI document
/// and the downstream base URL are required.
pub fn build_registry(cfg: &Config) -> Result<ToolRegistry, GatewayError> {
    let spec = cfg
        .openapi_spec
        .as_deref()
        .ok_or_else(|| GatewayError::Config("OPENAPI_SPEC_PATH is required".into()))?;
    let base_url = cfg
        .api_base_url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| GatewayError::Config("API_BASE_URL is required".into()))?;

    let catalog = EndpointCatalog::load(spec)?;
    let api = ApiClient::from_static_headers(base_url, cfg.headers.clone());
    Ok(ToolRegistry::new(catalog, api, RegistryOptions::from_config(cfg)))
}

pub fn build_transport(registry: Arc<ToolRegistry>, cfg: &Config) -> StreamableHttpTransport {
    let protocol = Arc::new(McpProtocol::new(registry, cfg.server_name.clone()));
    StreamableHttpTransport::new(protocol, cfg.sync_response_timeout())
}

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    cfg.validate()?;
    tracing::info!(
        mode = %cfg.mode,
        host = %cfg.host,
        port = cfg.port,
        endpoint = %cfg.endpoint_path,
        tools_mode = %cfg.tools_mode,
        "BOOT openapi-mcp-gateway"
    );
    let registry = Arc::new(build_registry(&cfg)?);

    if cfg.mode == "stdio" {
        return serve_stdio(StdioGateway::new(registry, cfg.server_name.clone())).await;
    }

    let transport = build_transport(registry, &cfg);
    let app = crate::infra::http_app::build_app(transport.clone(), &cfg);

    let listener = tokio::net::TcpListener::bind((cfg.host.as_str(), cfg.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, path = %cfg.endpoint_path, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(transport))
        .await?;
    Ok(())
}

/// Resolves on Ctrl-C after closing every session, so open SSE streams end
/// and the server can drain.
async fn shutdown_signal(transport: StreamableHttpTransport) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!(sessions = transport.session_count(), "shutting down");
    transport.close();
}
