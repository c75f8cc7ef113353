//! SSE framing for delivery channels: one event per JSON-RPC message.

use std::convert::Infallible;

use axum::http::{header, HeaderName, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::{Stream, StreamExt};

use crate::core::mcp::RpcMessage;
use crate::infra::http::headers::SESSION_HEADER;
use crate::infra::runtime::mcp_transport::DeliveryChannel;

pub fn to_event(message: &RpcMessage) -> Event {
    match Event::default().event("message").json_data(message) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "could not frame message as SSE event");
            Event::default().comment("unserializable message dropped")
        }
    }
}

pub fn event_stream(channel: DeliveryChannel) -> impl Stream<Item = Result<Event, Infallible>> {
    channel.map(|message| Ok(to_event(&message)))
}

/// Long-lived `text/event-stream` response for one delivery channel. The
/// stream ends when the channel's session is terminated.
pub fn sse_response(channel: DeliveryChannel) -> Response {
    let session_id = channel.session_id().to_string();
    let mut resp = Sse::new(event_stream(channel))
        .keep_alive(KeepAlive::default())
        .into_response();
    let headers = resp.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    if let Ok(v) = HeaderValue::from_str(&session_id) {
        headers.insert(HeaderName::from_static(SESSION_HEADER), v);
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mcp::RequestId;
    use serde_json::json;

    #[test]
    fn frames_message_as_json_event() {
        let msg = RpcMessage::response(RequestId::Number(1), json!({"ok": true}));
        let rendered = format!("{:?}", to_event(&msg));
        assert!(rendered.contains("message"));
    }
}
