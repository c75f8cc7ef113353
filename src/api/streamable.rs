//! axum binding of the streamable HTTP transport: POST / GET / DELETE on one
//! endpoint path.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde_json::Value as J;

use crate::core::mcp::{MessageKind, RpcMessage};
use crate::infra::http::headers::SESSION_HEADER;
use crate::infra::http::json as http_json;
use crate::infra::http::sse::sse_response;
use crate::infra::runtime::mcp_transport::{StreamableHttpTransport, TransportError};

/// Requests answered on the POST itself rather than over a delivery channel.
const SYNC_METHODS: &[&str] = &["tools/list"];

#[derive(Clone)]
pub struct StreamableState {
    pub transport: StreamableHttpTransport,
    pub max_body_bytes: usize,
    pub allowed_origins: Arc<Vec<String>>,
}

impl StreamableState {
    pub fn new(transport: StreamableHttpTransport, max_body_bytes: usize, allowed_origins: Vec<String>) -> Self {
        Self { transport, max_body_bytes, allowed_origins: Arc::new(allowed_origins) }
    }
}

pub fn router(state: StreamableState, path: &str) -> Router {
    Router::new()
        .route(
            path,
            post(handle_post)
                .get(handle_get)
                .delete(handle_delete)
                .fallback(method_not_allowed),
        )
        .with_state(state)
}

async fn handle_post(State(state): State<StreamableState>, headers: HeaderMap, body: Body) -> Response {
    if let Some(rejected) = check_origin(&headers, &state.allowed_origins) {
        return rejected;
    }
    if !is_json(&headers) {
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            http_json::invalid_request("Unsupported Media Type: Content-Type must be application/json"),
        )
            .into_response();
    }
    let message = match read_message(&headers, body, state.max_body_bytes).await {
        Ok(m) => m,
        Err(rejected) => return rejected,
    };

    let session_id = session_header(&headers);
    if message.is_initialize() {
        if session_id.is_some() {
            return (
                StatusCode::BAD_REQUEST,
                http_json::invalid_request("Invalid Request: initialize must not carry a session id"),
            )
                .into_response();
        }
        let id = request_id_json(&message);
        return match state.transport.open_session(message).await {
            Ok((sid, resp)) => with_session_header(Json(resp).into_response(), &sid),
            Err(e) => transport_error(id, &e),
        };
    }

    let Some(sid) = session_id.filter(|s| state.transport.has_session(s)) else {
        tracing::debug!(method = ?message.method, "rejected message without a live session");
        return (StatusCode::BAD_REQUEST, http_json::invalid_session()).into_response();
    };

    let wants_sync = message.kind() == MessageKind::Request
        && message.method.as_deref().is_some_and(|m| SYNC_METHODS.contains(&m));
    if wants_sync {
        let id = request_id_json(&message);
        return match state.transport.request_sync(&sid, message).await {
            Ok(resp) => with_session_header(Json(resp).into_response(), &sid),
            Err(e) => transport_error(id, &e),
        };
    }

    match state.transport.submit(&sid, message) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => transport_error(J::Null, &e),
    }
}

async fn handle_get(State(state): State<StreamableState>, headers: HeaderMap) -> Response {
    if let Some(rejected) = check_origin(&headers, &state.allowed_origins) {
        return rejected;
    }
    let Some(sid) = session_header(&headers) else {
        return (StatusCode::BAD_REQUEST, http_json::invalid_session()).into_response();
    };
    match state.transport.attach_channel(&sid) {
        Ok(channel) => sse_response(channel),
        Err(e) => transport_error(J::Null, &e),
    }
}

async fn handle_delete(State(state): State<StreamableState>, headers: HeaderMap) -> Response {
    if let Some(rejected) = check_origin(&headers, &state.allowed_origins) {
        return rejected;
    }
    let Some(sid) = session_header(&headers) else {
        return (StatusCode::BAD_REQUEST, http_json::invalid_session()).into_response();
    };
    match state.transport.terminate(&sid) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => transport_error(J::Null, &e),
    }
}

async fn method_not_allowed() -> Response {
    let mut resp = (
        StatusCode::METHOD_NOT_ALLOWED,
        http_json::invalid_request("Method not allowed"),
    )
        .into_response();
    resp.headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static("POST, GET, DELETE"));
    resp
}

/// Read and decode one JSON-RPC message, refusing bodies over `limit`
/// before they are fully buffered.
async fn read_message(headers: &HeaderMap, body: Body, limit: usize) -> Result<RpcMessage, Response> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(payload_too_large(limit));
    }

    let bytes = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => return Err(payload_too_large(limit)),
        Err(e) => {
            tracing::debug!(error = %e, "failed to read request body");
            return Err((StatusCode::BAD_REQUEST, http_json::invalid_request("could not read body")).into_response());
        }
    };

    let value: J = serde_json::from_slice(&bytes).map_err(|e| {
        (StatusCode::BAD_REQUEST, http_json::parse_error(format!("Parse error: {e}"))).into_response()
    })?;
    if value.is_array() {
        return Err((
            StatusCode::BAD_REQUEST,
            http_json::invalid_request("Invalid Request: batch messages are not supported"),
        )
            .into_response());
    }
    let message: RpcMessage = serde_json::from_value(value).map_err(|e| {
        (StatusCode::BAD_REQUEST, http_json::invalid_request(format!("Invalid Request: {e}"))).into_response()
    })?;
    if !message.is_well_formed() {
        return Err((
            StatusCode::BAD_REQUEST,
            http_json::invalid_request("Invalid Request: not a JSON-RPC 2.0 message"),
        )
            .into_response());
    }
    Ok(message)
}

fn payload_too_large(limit: usize) -> Response {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        http_json::invalid_request(format!("Payload too large: limit is {limit} bytes")),
    )
        .into_response()
}

fn transport_error(id: J, err: &TransportError) -> Response {
    if !matches!(err, TransportError::InvalidSession) {
        tracing::warn!(error = %err, "transport error");
    }
    http_json::from_transport_error(id, err).into_response()
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn with_session_header(mut resp: Response, session_id: &str) -> Response {
    if let Ok(v) = HeaderValue::from_str(session_id) {
        resp.headers_mut().insert(HeaderName::from_static(SESSION_HEADER), v);
    }
    resp
}

fn request_id_json(message: &RpcMessage) -> J {
    message
        .id
        .as_ref()
        .and_then(|id| serde_json::to_value(id).ok())
        .unwrap_or(J::Null)
}

fn check_origin(headers: &HeaderMap, allowed: &[String]) -> Option<Response> {
    let origin = headers.get(header::ORIGIN)?;
    let origin = origin.to_str().unwrap_or("");
    if origin_allowed(origin, allowed) {
        return None;
    }
    tracing::warn!(origin, "rejected cross-origin request");
    Some((StatusCode::FORBIDDEN, http_json::invalid_request("Forbidden: origin not allowed")).into_response())
}

/// Local origins are always allowed; anything else must be listed.
pub fn origin_allowed(origin: &str, allowed: &[String]) -> bool {
    if allowed.iter().any(|a| a == "*" || a.eq_ignore_ascii_case(origin)) {
        return true;
    }
    match reqwest::Url::parse(origin) {
        Ok(url) => matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]")),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_origins_are_allowed() {
        assert!(origin_allowed("http://localhost:3000", &[]));
        assert!(origin_allowed("http://127.0.0.1", &[]));
        assert!(origin_allowed("http://[::1]:8080", &[]));
        assert!(!origin_allowed("https://evil.example", &[]));
        assert!(!origin_allowed("null", &[]));
        assert!(!origin_allowed("http://localhost.evil.example", &[]));
    }

    #[test]
    fn configured_origins_are_allowed() {
        let allowed = vec!["https://app.example".to_string()];
        assert!(origin_allowed("https://app.example", &allowed));
        assert!(!origin_allowed("https://other.example", &allowed));
        assert!(origin_allowed("https://anything", &["*".to_string()]));
    }

    #[test]
    fn content_type_may_carry_parameters() {
        let mut h = HeaderMap::new();
        h.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
        assert!(is_json(&h));
        h.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(!is_json(&h));
        assert!(!is_json(&HeaderMap::new()));
    }
}
