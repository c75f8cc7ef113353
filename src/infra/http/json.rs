use axum::http::StatusCode;
use axum::Json;

use crate::core::mcp::{
    err as rpc_err, ok as rpc_ok, RpcResp, INTERNAL_ERROR, INVALID_REQUEST, PARSE_ERROR, SERVER_ERROR,
};
use crate::infra::runtime::mcp_transport::TransportError;

pub fn ok(id: serde_json::Value, result: serde_json::Value) -> Json<RpcResp> {
    Json(rpc_ok(id, result))
}

pub fn error(id: serde_json::Value, code: i32, message: impl Into<String>) -> Json<RpcResp> {
    Json(rpc_err(id, code, message, None))
}

pub fn parse_error(message: impl Into<String>) -> Json<RpcResp> {
    error(serde_json::Value::Null, PARSE_ERROR, message)
}

pub fn invalid_request(message: impl Into<String>) -> Json<RpcResp> {
    error(serde_json::Value::Null, INVALID_REQUEST, message)
}

pub fn invalid_session() -> Json<RpcResp> {
    error(serde_json::Value::Null, SERVER_ERROR, TransportError::InvalidSession.to_string())
}

/// Map a TransportError onto an HTTP status and a JSON-RPC error envelope.
pub fn from_transport_error(id: serde_json::Value, err: &TransportError) -> (StatusCode, Json<RpcResp>) {
    match err {
        TransportError::InvalidSession => (StatusCode::BAD_REQUEST, invalid_session()),
        TransportError::InvalidMessage(m) => (StatusCode::BAD_REQUEST, error(id, INVALID_REQUEST, m.clone())),
        TransportError::ResponseTimeout(..) => (StatusCode::GATEWAY_TIMEOUT, error(id, SERVER_ERROR, err.to_string())),
        TransportError::Closed => (StatusCode::SERVICE_UNAVAILABLE, error(id, SERVER_ERROR, err.to_string())),
        TransportError::DeliveryFailed(_) | TransportError::HandlerDropped(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, error(id, INTERNAL_ERROR, err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json as AxumJson;
    use serde_json::{json, Value};
    use std::time::Duration;

    #[test]
    fn wraps_ok_response_in_json_rpc_envelope() {
        let AxumJson(resp) = ok(json!(1), json!({"x": 1}));
        assert_eq!(resp.jsonrpc, "2.0");
        assert!(resp.error.is_none());
        assert_eq!(resp.result.unwrap()["x"], 1);
    }

    #[test]
    fn wraps_error_response_in_json_rpc_envelope() {
        let AxumJson(resp) = error(Value::Null, -32601, "method not found");
        assert!(resp.result.is_none());
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32601);
        assert!(err.message.contains("method not found"));
    }

    #[test]
    fn builds_parse_error_with_standard_code() {
        let AxumJson(resp) = parse_error("bad json");
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32700);
        assert!(err.message.contains("bad json"));
    }

    #[test]
    fn invalid_session_uses_server_error_code() {
        let AxumJson(resp) = invalid_session();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32000);
        assert!(err.message.starts_with("Invalid session"));
    }

    #[test]
    fn maps_transport_errors_to_status_codes() {
        let (status, _) = from_transport_error(Value::Null, &TransportError::InvalidSession);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let timeout = TransportError::ResponseTimeout(crate::core::mcp::RequestId::Number(1), Duration::from_secs(1));
        let (status, AxumJson(body)) = from_transport_error(json!(1), &timeout);
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body.id, json!(1));
        let (status, _) = from_transport_error(Value::Null, &TransportError::Closed);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
