use reqwest::RequestBuilder;

pub const SESSION_HEADER: &str = "mcp-session-id";

/// Correlation id for one downstream request.
pub fn generate_request_id() -> String {
    format!("gw-{}", uuid::Uuid::new_v4())
}

/// Add standard headers to an outgoing request. Returns the updated builder and the request id used.
pub fn add_standard_headers(
    builder: RequestBuilder,
    request_id: Option<String>,
) -> (RequestBuilder, String) {
    let rid = request_id.unwrap_or_else(generate_request_id);
    let b = builder.header("x-request-id", rid.as_str()).header(
        reqwest::header::USER_AGENT,
        format!("openapi-mcp-gateway/{}", env!("CARGO_PKG_VERSION")),
    );
    (b, rid)
}
