use openapi_mcp_gateway::core::tool_id::{decode, decode_template, encode, ToolId, METHOD_SEPARATOR};
use openapi_mcp_gateway::tools::catalog::EndpointCatalog;
use serde_json::json;

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

#[test]
fn encoded_ids_use_only_safe_characters() {
    let paths = [
        "/users/{id}",
        "/weird path/with spaces",
        "/emoji/✓/ok",
        "//double//slashes/",
        "/q?x=1&y=2",
        "/{}/empty",
    ];
    for path in paths {
        let id = encode("get", path);
        let (method, rest) = id.split_once(METHOD_SEPARATOR).unwrap();
        assert_eq!(method, "GET");
        assert!(rest.chars().all(is_id_char), "unexpected character in {id}");
    }
}

#[test]
fn decode_never_fails() {
    for raw in ["", "::", "GET::", "nomethod", "get::a__b", ":::"] {
        let (method, path) = decode(raw);
        assert_eq!(method, method.to_ascii_uppercase());
        assert!(path.is_empty() || path.starts_with('/'));
    }
}

#[test]
fn every_catalog_endpoint_round_trips() {
    let doc = json!({
        "paths": {
            "/pets": {"get": {}, "post": {}},
            "/pets/{petId}": {"get": {}, "delete": {}},
            "/stores/{storeId}/orders/{orderId}": {"put": {}},
            "/v1.0/health-check": {"head": {}},
            "/reports/{reportId}.json": {"get": {}}
        }
    });
    let catalog = EndpointCatalog::from_openapi(&doc).unwrap();
    assert_eq!(catalog.len(), 7);
    for ep in catalog.endpoints() {
        let id = ep.tool_id();
        assert_eq!(id.template(), (ep.method.clone(), ep.path.clone()), "for {id}");
        assert_eq!(id, ToolId::new(&ep.method, &ep.path));
    }
}

#[test]
fn method_case_does_not_change_identity() {
    assert_eq!(encode("get", "/a/{b}"), encode("GET", "/a/{b}"));
    assert_eq!(decode_template("delete::a---b"), ("DELETE".to_string(), "/a/{b}".to_string()));
}

#[test]
fn leading_and_trailing_slashes_are_ignored() {
    assert_eq!(encode("GET", "users/"), encode("GET", "/users"));
    assert_eq!(encode("GET", "/"), "GET::");
    assert_eq!(decode("GET::"), ("GET".to_string(), String::new()));
}
