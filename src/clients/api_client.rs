//! Request execution pipeline: tool call -> downstream HTTP request.
//!
//! Per call: decode the tool id, substitute path parameters, fetch fresh
//! credentials, route the remaining arguments to query or body, dispatch.
//! A 401/403 on the first attempt is offered to the `AuthProvider`; if it asks
//! for a retry the whole sequence runs exactly once more.

use std::sync::Arc;
use std::time::Instant;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::clients::auth::{
    is_auth_status, AuthError, AuthFailure, AuthHeaders, AuthProvider, StaticAuthProvider,
};
use crate::core::tool_id::{ToolId, PARAM_MARKER};
use crate::domain::{ParameterLocation, ToolDefinition};
use crate::infra::http::headers::add_standard_headers;
use crate::infra::logging::log_metric;
use crate::infra::runtime::limits::make_http_client;

/// Characters `encodeURIComponent` leaves alone.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("authentication failed for {method} {path}: {source}")]
    Auth {
        method: String,
        path: String,
        #[source]
        source: AuthError,
    },
    #[error("API request failed: {method} {path} returned HTTP {status}{}", body_suffix(.body))]
    Http {
        method: String,
        path: String,
        status: u16,
        body: Option<String>,
    },
    #[error("API request failed: {method} {path}: {message}")]
    Network {
        method: String,
        path: String,
        message: String,
    },
    #[error("unknown endpoint: {method} {path}")]
    UnknownEndpoint { method: String, path: String },
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

impl ExecuteError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ExecuteError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn body_suffix(body: &Option<String>) -> String {
    match body {
        Some(b) if !b.is_empty() => format!(": {b}"),
        _ => String::new(),
    }
}

/// Everything needed to put one request on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct CallDescriptor {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: AuthHeaders,
}

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
    auth: Arc<dyn AuthProvider>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient").field("base_url", &self.base_url).finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn from_provider(base_url: impl Into<String>, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            base_url: base_url.into(),
            http: make_http_client(),
            auth,
        }
    }

    pub fn from_static_headers(base_url: impl Into<String>, headers: AuthHeaders) -> Self {
        Self::from_provider(base_url, Arc::new(StaticAuthProvider::new(headers)))
    }

    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Execute a precomputed tool. `tool` supplies the schema used to find
    /// path parameters; without it the structural fallback applies.
    pub async fn execute_tool(
        &self,
        tool_id: &ToolId,
        params: Map<String, Value>,
        tool: Option<&ToolDefinition>,
    ) -> Result<Value, ExecuteError> {
        let (method, template) = tool_id.decode();
        if method.is_empty() {
            return Err(ExecuteError::InvalidArguments(format!("malformed tool id: {tool_id}")));
        }
        let template = if template.is_empty() { "/".to_string() } else { template };
        self.execute(&method, &template, params, tool).await
    }

    /// Execute against an explicit method and path template.
    pub async fn execute(
        &self,
        method: &str,
        template: &str,
        params: Map<String, Value>,
        tool: Option<&ToolDefinition>,
    ) -> Result<Value, ExecuteError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ExecuteError::InvalidArguments(format!("invalid HTTP method: {method}")))?;

        let mut is_retry = false;
        loop {
            match self.attempt(&method, template, params.clone(), tool).await {
                Err(ExecuteError::Http { method: m, path, status, body })
                    if is_auth_status(status) && !is_retry =>
                {
                    let failure = AuthFailure { method: m, path, status, body };
                    let retry = self.auth.handle_auth_error(&failure).await.map_err(|source| {
                        ExecuteError::Auth {
                            method: failure.method.clone(),
                            path: failure.path.clone(),
                            source,
                        }
                    })?;
                    if !retry {
                        return Err(ExecuteError::Http {
                            method: failure.method,
                            path: failure.path,
                            status: failure.status,
                            body: failure.body,
                        });
                    }
                    tracing::info!(method = %method, path = %failure.path, status = failure.status, "retrying after auth refresh");
                    log_metric("downstream", "auth_retry_total", 1.0);
                    is_retry = true;
                }
                other => return other,
            }
        }
    }

    async fn attempt(
        &self,
        method: &Method,
        template: &str,
        mut params: Map<String, Value>,
        tool: Option<&ToolDefinition>,
    ) -> Result<Value, ExecuteError> {
        let path = resolve_path(template, &mut params, tool);

        let headers = self.auth.get_auth_headers().await.map_err(|source| ExecuteError::Auth {
            method: method.to_string(),
            path: path.clone(),
            source,
        })?;

        let routed = route_parameters(method, params, tool);
        let mut merged = routed.headers;
        merged.extend(headers);
        let call = CallDescriptor { method: method.clone(), path, query: routed.query, body: routed.body, headers: merged };
        self.dispatch(call).await
    }

    async fn dispatch(&self, call: CallDescriptor) -> Result<Value, ExecuteError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), call.path);
        let mut builder = self.http.request(call.method.clone(), &url);
        if !call.query.is_empty() {
            builder = builder.query(&call.query);
        }
        if let Some(body) = &call.body {
            builder = builder.json(body);
        }
        for (name, value) in &call.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let (builder, rid) = add_standard_headers(builder, None);

        tracing::debug!(method = %call.method, path = %call.path, request_id = %rid, "downstream request");
        let start = Instant::now();
        let network_err = |e: reqwest::Error| ExecuteError::Network {
            method: call.method.to_string(),
            path: call.path.clone(),
            message: e.to_string(),
        };

        let resp = match builder.send().await {
            Ok(resp) => resp,
            Err(e) => {
                log_metric("downstream", "error_total", 1.0);
                return Err(network_err(e));
            }
        };
        let status = resp.status();
        let text = resp.text().await.map_err(network_err)?;
        log_metric("downstream", "latency_ms", start.elapsed().as_millis() as f64);

        if !status.is_success() {
            log_metric("downstream", "error_total", 1.0);
            tracing::warn!(method = %call.method, path = %call.path, status = status.as_u16(), "downstream call failed");
            return Err(ExecuteError::Http {
                method: call.method.to_string(),
                path: call.path,
                status: status.as_u16(),
                body: (!text.is_empty()).then_some(text),
            });
        }
        Ok(parse_body(text))
    }
}

fn parse_body(text: String) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

/// Substitute path parameters into `template`, removing them from `params`.
///
/// With a schema, every argument tagged `path` is substituted (brace, colon
/// and `---name` marker syntax, in that order). Without one, any argument
/// whose name appears as a placeholder or as a literal segment is used.
/// Longer names go first so `---item-id` is not claimed by `item`.
pub fn resolve_path(
    template: &str,
    params: &mut Map<String, Value>,
    tool: Option<&ToolDefinition>,
) -> String {
    let mut path = template.to_string();

    match tool.filter(|t| t.has_properties()) {
        Some(tool) => {
            let mut keys: Vec<String> = params
                .keys()
                .filter(|k| tool.parameter_location(k) == Some(ParameterLocation::Path))
                .cloned()
                .collect();
            keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
            for key in keys {
                let Some(value) = params.remove(&key) else { continue };
                let encoded = encode_component(&value);
                match substitute(&path, &key, &encoded) {
                    Some(resolved) => path = resolved,
                    None => tracing::warn!(param = %key, template, "path parameter has no placeholder"),
                }
            }
        }
        None => {
            let mut keys: Vec<String> = params.keys().cloned().collect();
            keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
            for key in keys {
                let Some(value) = params.get(&key) else { continue };
                let encoded = encode_component(value);
                let resolved = substitute(&path, &key, &encoded)
                    .or_else(|| replace_literal_segment(&path, &key, &encoded));
                if let Some(resolved) = resolved {
                    path = resolved;
                    params.remove(&key);
                }
            }
        }
    }
    path
}

fn substitute(path: &str, key: &str, encoded: &str) -> Option<String> {
    let brace = format!("{{{key}}}");
    if path.contains(&brace) {
        return Some(path.replace(&brace, encoded));
    }

    let colon = format!(":{key}");
    if path.split('/').any(|seg| seg == colon) {
        let replaced: Vec<&str> = path
            .split('/')
            .map(|seg| if seg == colon { encoded } else { seg })
            .collect();
        return Some(replaced.join("/"));
    }

    replace_marker(path, key, encoded)
}

/// `---key` starts a segment whose slash was folded into the marker. The name
/// ends at the first character that cannot continue it, so literal text such
/// as `.json` may follow in the same segment.
fn replace_marker(path: &str, key: &str, encoded: &str) -> Option<String> {
    let marker = format!("{PARAM_MARKER}{key}");
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    let mut found = false;
    while let Some(pos) = rest.find(&marker) {
        let after = &rest[pos + marker.len()..];
        let at_boundary = after
            .chars()
            .next()
            .map_or(true, |c| !(c.is_ascii_alphanumeric() || c == '_'));
        out.push_str(&rest[..pos]);
        if at_boundary {
            if !out.ends_with('/') {
                out.push('/');
            }
            out.push_str(encoded);
            found = true;
        } else {
            out.push_str(&marker);
        }
        rest = after;
    }
    out.push_str(rest);
    found.then_some(out)
}

fn replace_literal_segment(path: &str, key: &str, encoded: &str) -> Option<String> {
    if !path.split('/').any(|seg| seg == key) {
        return None;
    }
    let replaced: Vec<&str> = path
        .split('/')
        .map(|seg| if seg == key { encoded } else { seg })
        .collect();
    Some(replaced.join("/"))
}

fn encode_component(value: &Value) -> String {
    let raw = param_string(value).unwrap_or_default();
    utf8_percent_encode(&raw, COMPONENT).to_string()
}

fn param_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(param_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => Some(other.to_string()),
    }
}

fn uses_query(method: &Method) -> bool {
    *method == Method::GET
        || *method == Method::DELETE
        || *method == Method::HEAD
        || *method == Method::OPTIONS
}

/// Where the arguments left after path substitution go on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutedArguments {
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: AuthHeaders,
}

/// Split what is left after path substitution into headers, query pairs or
/// a body. Arguments the schema tags `header` or `cookie` become request
/// headers; a lone whole-body argument is sent as the body itself.
pub fn route_parameters(
    method: &Method,
    mut params: Map<String, Value>,
    tool: Option<&ToolDefinition>,
) -> RoutedArguments {
    let mut routed = RoutedArguments::default();

    if let Some(tool) = tool {
        let mut cookies = Vec::new();
        let keys: Vec<(String, ParameterLocation)> = params
            .keys()
            .filter_map(|k| match tool.parameter_location(k) {
                Some(loc @ (ParameterLocation::Header | ParameterLocation::Cookie)) => Some((k.clone(), loc)),
                _ => None,
            })
            .collect();
        for (key, location) in keys {
            let Some(text) = params.remove(&key).as_ref().and_then(param_string) else { continue };
            if location == ParameterLocation::Cookie {
                cookies.push(format!("{key}={text}"));
            } else {
                routed.headers.insert(key, text);
            }
        }
        if !cookies.is_empty() {
            routed.headers.insert("Cookie".into(), cookies.join("; "));
        }
    }

    if uses_query(method) {
        routed.query = params
            .into_iter()
            .filter_map(|(k, v)| param_string(&v).map(|s| (k, s)))
            .collect();
        return routed;
    }

    let whole = tool
        .and_then(ToolDefinition::request_body_argument)
        .filter(|key| params.len() == 1 && params.contains_key(*key));
    routed.body = match whole.and_then(|key| params.remove(key)) {
        Some(body) => Some(body),
        None => Some(Value::Object(params)),
    };
    routed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Endpoint;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    fn item_tool() -> ToolDefinition {
        let ep = Endpoint::new("GET", "/items/{id}")
            .with_parameter("id", ParameterLocation::Path, true)
            .with_parameter("format", ParameterLocation::Query, false);
        ToolDefinition {
            id: ep.tool_id(),
            name: "getItem".into(),
            description: String::new(),
            input_schema: ep.input_schema(),
        }
    }

    #[test]
    fn path_parameter_takes_precedence_over_query() {
        let tool = item_tool();
        let mut params = obj(json!({"id": "7", "format": "json"}));
        let path = resolve_path("/items/{id}", &mut params, Some(&tool));
        assert_eq!(path, "/items/7");
        let routed = route_parameters(&Method::GET, params, Some(&tool));
        assert_eq!(routed.query, vec![("format".to_string(), "json".to_string())]);
        assert!(routed.body.is_none());
    }

    #[test]
    fn substitutes_marker_syntax_from_decoded_tool_id() {
        let tool = item_tool();
        let (_, template) = tool.id.decode();
        assert_eq!(template, "/items---id");
        let mut params = obj(json!({"id": 42}));
        assert_eq!(resolve_path(&template, &mut params, Some(&tool)), "/items/42");
        assert!(params.is_empty());
    }

    #[test]
    fn substitutes_colon_segments() {
        let tool = item_tool();
        let mut params = obj(json!({"id": "abc"}));
        assert_eq!(resolve_path("/items/:id/detail", &mut params, Some(&tool)), "/items/abc/detail");
    }

    #[test]
    fn marker_does_not_match_longer_names() {
        assert_eq!(replace_marker("/items---idx", "id", "1"), None);
        assert_eq!(
            replace_marker("/a---id---other", "id", "1").as_deref(),
            Some("/a/1---other")
        );
    }

    #[test]
    fn leading_marker_keeps_single_slash() {
        let mut params = obj(json!({"tenant": "acme"}));
        assert_eq!(resolve_path("/---tenant/items", &mut params, None), "/acme/items");
    }

    #[test]
    fn percent_encodes_path_values() {
        let tool = item_tool();
        let mut params = obj(json!({"id": "a b/c"}));
        assert_eq!(resolve_path("/items/{id}", &mut params, Some(&tool)), "/items/a%20b%2Fc");
    }

    #[test]
    fn path_location_removed_even_without_placeholder() {
        let tool = item_tool();
        let mut params = obj(json!({"id": "1"}));
        assert_eq!(resolve_path("/other", &mut params, Some(&tool)), "/other");
        assert!(params.is_empty());
    }

    #[test]
    fn structural_fallback_matches_placeholders_and_literal_segments() {
        let mut params = obj(json!({"id": "9", "userId": "u1", "q": "x"}));
        let path = resolve_path("/users/userId/items/{id}", &mut params, None);
        assert_eq!(path, "/users/u1/items/9");
        assert_eq!(params.len(), 1);
        assert!(params.contains_key("q"));
    }

    #[test]
    fn query_methods_join_arrays_with_commas() {
        let params = obj(json!({"tags": ["a", "b", 3], "skip": null, "limit": 10}));
        let RoutedArguments { mut query, body, .. } = route_parameters(&Method::DELETE, params, None);
        query.sort();
        assert_eq!(
            query,
            vec![
                ("limit".to_string(), "10".to_string()),
                ("tags".to_string(), "a,b,3".to_string())
            ]
        );
        assert!(body.is_none());
    }

    #[test]
    fn body_methods_send_params_verbatim() {
        let params = obj(json!({"name": "rex", "tags": ["a"]}));
        let routed = route_parameters(&Method::POST, params, None);
        assert!(routed.query.is_empty());
        assert_eq!(routed.body, Some(json!({"name": "rex", "tags": ["a"]})));
    }

    fn tool_for(ep: Endpoint) -> ToolDefinition {
        ToolDefinition {
            id: ep.tool_id(),
            name: "t".into(),
            description: String::new(),
            input_schema: ep.input_schema(),
        }
    }

    #[test]
    fn non_object_body_is_sent_unwrapped() {
        let mut ep = Endpoint::new("PUT", "/tags");
        ep.request_body = Some(json!({"type": "array", "items": {"type": "string"}}));
        let tool = tool_for(ep);
        let routed = route_parameters(&Method::PUT, obj(json!({"body": ["a", "b"]})), Some(&tool));
        assert_eq!(routed.body, Some(json!(["a", "b"])));

        let routed = route_parameters(&Method::PUT, obj(json!({"body": ["a"], "extra": 1})), Some(&tool));
        assert_eq!(routed.body, Some(json!({"body": ["a"], "extra": 1})));
    }

    #[test]
    fn object_body_property_named_body_stays_wrapped() {
        let mut ep = Endpoint::new("POST", "/notes");
        ep.request_body = Some(json!({"type": "object", "properties": {"body": {"type": "string"}}}));
        let tool = tool_for(ep);
        let routed = route_parameters(&Method::POST, obj(json!({"body": "hi"})), Some(&tool));
        assert_eq!(routed.body, Some(json!({"body": "hi"})));
    }

    #[test]
    fn header_and_cookie_arguments_become_headers() {
        let ep = Endpoint::new("GET", "/items")
            .with_parameter("X-Tenant", ParameterLocation::Header, false)
            .with_parameter("session", ParameterLocation::Cookie, false)
            .with_parameter("theme", ParameterLocation::Cookie, false)
            .with_parameter("q", ParameterLocation::Query, false);
        let tool = tool_for(ep);
        let params = obj(json!({"X-Tenant": "acme", "session": "s1", "theme": "dark", "q": "x"}));
        let routed = route_parameters(&Method::GET, params, Some(&tool));
        assert_eq!(routed.query, vec![("q".to_string(), "x".to_string())]);
        assert_eq!(routed.headers.get("X-Tenant").map(String::as_str), Some("acme"));
        let cookie = routed.headers.get("Cookie").cloned().unwrap_or_default();
        assert!(cookie.contains("session=s1"));
        assert!(cookie.contains("theme=dark"));
    }

    #[test]
    fn marker_followed_by_literal_text_in_same_segment() {
        let ep = Endpoint::new("GET", "/reports/{id}.json").with_parameter("id", ParameterLocation::Path, true);
        let tool = tool_for(ep);
        let (_, template) = tool.id.decode();
        assert_eq!(template, "/reports---id.json");
        let mut params = obj(json!({"id": "7"}));
        assert_eq!(resolve_path(&template, &mut params, Some(&tool)), "/reports/7.json");
    }

    #[test]
    fn longer_parameter_names_are_substituted_first() {
        let ep = Endpoint::new("GET", "/x/{item-id}/{item}")
            .with_parameter("item", ParameterLocation::Path, true)
            .with_parameter("item-id", ParameterLocation::Path, true);
        let tool = tool_for(ep);
        let mut params = obj(json!({"item": "a", "item-id": "b"}));
        assert_eq!(resolve_path("/x---item-id---item", &mut params, Some(&tool)), "/x/b/a");
    }

    #[test]
    fn http_error_message_carries_context() {
        let e = ExecuteError::Http {
            method: "GET".into(),
            path: "/items/7".into(),
            status: 404,
            body: Some("not found".into()),
        };
        let msg = e.to_string();
        assert!(msg.contains("GET /items/7"));
        assert!(msg.contains("404"));
        assert!(msg.contains("not found"));
        assert_eq!(e.status(), Some(404));
    }

    #[test]
    fn parses_json_or_falls_back_to_text() {
        assert_eq!(parse_body("{\"a\":1}".into()), json!({"a": 1}));
        assert_eq!(parse_body("plain".into()), json!("plain"));
        assert_eq!(parse_body(String::new()), Value::Null);
    }
}
