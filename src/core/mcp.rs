//! Shared MCP protocol surface: JSON-RPC 2.0 messages as they cross the wire.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as J;

pub const JSONRPC_VERSION: &str = "2.0";
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const SERVER_ERROR: i32 = -32000;

/// Wire-level request identifier. Unique only among one session's
/// outstanding requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Notification,
    Response,
}

/// One JSON-RPC message: request, notification or response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<J>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<J>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErr>,
}

impl RpcMessage {
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: J) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id.into()),
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<J>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: None,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    pub fn response(id: RequestId, result: J) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn error_response(id: RequestId, code: i32, message: impl Into<String>, data: Option<J>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(RpcErr { code, message: message.into(), data }),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match (&self.method, &self.id) {
            (Some(_), Some(_)) => MessageKind::Request,
            (Some(_), None) => MessageKind::Notification,
            (None, _) => MessageKind::Response,
        }
    }

    /// A message must carry a method, or be a response with a result or error.
    pub fn is_well_formed(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION
            && (self.method.is_some() || self.result.is_some() || self.error.is_some())
    }

    pub fn is_initialize(&self) -> bool {
        self.kind() == MessageKind::Request && self.method.as_deref() == Some("initialize")
    }

    /// Id of the request this message answers, if it is a response.
    pub fn response_id(&self) -> Option<&RequestId> {
        match self.kind() {
            MessageKind::Response => self.id.as_ref(),
            _ => None,
        }
    }
}

// --- Envelope for transport-level errors, where the id may be unknown ---

#[derive(Serialize, Debug, Clone)]
pub struct RpcResp {
    pub jsonrpc: &'static str,
    pub id: J,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<J>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErr>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RpcErr {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<J>,
}

pub fn ok(id: J, result: J) -> RpcResp {
    RpcResp { jsonrpc: JSONRPC_VERSION, id, result: Some(result), error: None }
}
pub fn err(id: J, code: i32, msg: impl Into<String>, data: Option<J>) -> RpcResp {
    RpcResp { jsonrpc: JSONRPC_VERSION, id, result: None, error: Some(RpcErr { code, message: msg.into(), data }) }
}

// --- Initialize result ---

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: J,
    pub server_info: ServerInfo,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn it_serializes_initialize_result() {
        let v = InitializeResult {
            protocol_version: DEFAULT_PROTOCOL_VERSION.into(),
            capabilities: json!({"tools": {}}),
            server_info: ServerInfo { name: "gw".into(), version: "0.1".into() },
        };
        let s = serde_json::to_string(&v).unwrap();
        assert!(s.contains("serverInfo"));
        assert!(s.contains("protocolVersion"));
    }

    #[test]
    fn classifies_message_kinds() {
        let req: RpcMessage =
            serde_json::from_value(json!({"jsonrpc":"2.0","id":1,"method":"tools/list"})).unwrap();
        assert_eq!(req.kind(), MessageKind::Request);

        let note: RpcMessage =
            serde_json::from_value(json!({"jsonrpc":"2.0","method":"notifications/initialized"})).unwrap();
        assert_eq!(note.kind(), MessageKind::Notification);

        let resp: RpcMessage =
            serde_json::from_value(json!({"jsonrpc":"2.0","id":"abc","result":{}})).unwrap();
        assert_eq!(resp.kind(), MessageKind::Response);
        assert_eq!(resp.response_id(), Some(&RequestId::String("abc".into())));
    }

    #[test]
    fn request_ids_keep_their_json_type() {
        let num = serde_json::to_value(RequestId::Number(7)).unwrap();
        let text = serde_json::to_value(RequestId::from("7")).unwrap();
        assert_eq!(num, json!(7));
        assert_eq!(text, json!("7"));
        assert_ne!(RequestId::Number(7), RequestId::from("7"));
    }

    #[test]
    fn rejects_messages_without_method_or_outcome() {
        let msg: RpcMessage = serde_json::from_value(json!({"jsonrpc":"2.0","id":1})).unwrap();
        assert!(!msg.is_well_formed());
        let wrong_version: RpcMessage =
            serde_json::from_value(json!({"jsonrpc":"1.0","id":1,"method":"x"})).unwrap();
        assert!(!wrong_version.is_well_formed());
    }

    #[test]
    fn detects_initialize() {
        let init = RpcMessage::request(1_i64, "initialize", json!({}));
        assert!(init.is_initialize());
        assert!(!RpcMessage::notification("initialize", None).is_initialize());
    }

    #[test]
    fn error_response_omits_result() {
        let msg = RpcMessage::error_response(RequestId::Number(3), METHOD_NOT_FOUND, "nope", None);
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["error"]["code"], -32601);
        assert!(v.get("result").is_none());
        assert_eq!(v["id"], 3);
    }
}
