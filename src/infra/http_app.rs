use axum::{routing::get, Router};

use crate::api::streamable::{self, StreamableState};
use crate::infra::config::Config;
use crate::infra::runtime::mcp_transport::StreamableHttpTransport;

/// `/healthz` plus the streamable MCP endpoint at `cfg.endpoint_path`.
pub fn build_app(transport: StreamableHttpTransport, cfg: &Config) -> Router {
    let state = StreamableState::new(transport, cfg.max_body_bytes, cfg.allowed_origins.clone());

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(streamable::router(state, &cfg.endpoint_path))
}
