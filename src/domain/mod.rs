use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::core::tool_id::ToolId;

/// JSON-schema extension key carrying where a tool argument goes on the wire.
pub const LOCATION_KEY: &str = "x-parameter-location";

/// Marks the `body` argument that stands for the whole request body.
pub const REQUEST_BODY_KEY: &str = "x-request-body";

/// Argument name a non-object request body is passed under.
pub const BODY_ARGUMENT: &str = "body";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
    Body,
}

impl ParameterLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterLocation::Path => "path",
            ParameterLocation::Query => "query",
            ParameterLocation::Header => "header",
            ParameterLocation::Cookie => "cookie",
            ParameterLocation::Body => "body",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "path" => Some(ParameterLocation::Path),
            "query" => Some(ParameterLocation::Query),
            "header" => Some(ParameterLocation::Header),
            "cookie" => Some(ParameterLocation::Cookie),
            "body" => Some(ParameterLocation::Body),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub location: ParameterLocation,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub schema: Value,
}

/// One operation of the downstream API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub parameters: Vec<ParameterSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Value>,
}

impl Endpoint {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            operation_id: None,
            summary: None,
            description: None,
            tags: Vec::new(),
            parameters: Vec::new(),
            request_body: None,
        }
    }

    pub fn tool_id(&self) -> ToolId {
        ToolId::new(&self.method, &self.path)
    }

    pub fn with_parameter(mut self, name: &str, location: ParameterLocation, required: bool) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.to_string(),
            location,
            required,
            description: None,
            schema: json!({"type": "string"}),
        });
        self
    }

    /// Flattened JSON schema for the tool's arguments. Every property is
    /// tagged with its wire location; object request bodies are merged in as
    /// `body` properties, any other body schema sits under a `body` key.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required: Vec<Value> = Vec::new();

        for p in &self.parameters {
            let mut schema = match &p.schema {
                Value::Object(m) => m.clone(),
                _ => Map::new(),
            };
            if let Some(desc) = &p.description {
                schema.entry("description").or_insert_with(|| Value::String(desc.clone()));
            }
            schema.insert(LOCATION_KEY.into(), Value::String(p.location.as_str().into()));
            properties.insert(p.name.clone(), Value::Object(schema));
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }

        if let Some(body) = &self.request_body {
            match body.get("properties").and_then(Value::as_object) {
                Some(props) => {
                    for (name, schema) in props {
                        let mut schema = schema.as_object().cloned().unwrap_or_default();
                        schema.insert(LOCATION_KEY.into(), Value::String("body".into()));
                        properties.entry(name.clone()).or_insert(Value::Object(schema));
                    }
                    if let Some(req) = body.get("required").and_then(Value::as_array) {
                        required.extend(req.iter().cloned());
                    }
                }
                None => {
                    let mut schema = body.as_object().cloned().unwrap_or_default();
                    schema.insert(LOCATION_KEY.into(), Value::String("body".into()));
                    schema.insert(REQUEST_BODY_KEY.into(), Value::Bool(true));
                    properties.insert(BODY_ARGUMENT.into(), Value::Object(schema));
                }
            }
        }

        let mut out = Map::new();
        out.insert("type".into(), Value::String("object".into()));
        out.insert("properties".into(), Value::Object(properties));
        if !required.is_empty() {
            out.insert("required".into(), Value::Array(required));
        }
        Value::Object(out)
    }
}

/// A tool exposed to MCP clients; one per catalog endpoint, plus the
/// built-in meta tools.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub id: ToolId,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Declared wire location of an argument, when the schema carries one.
    pub fn parameter_location(&self, key: &str) -> Option<ParameterLocation> {
        self.input_schema
            .get("properties")?
            .get(key)?
            .get(LOCATION_KEY)?
            .as_str()
            .and_then(ParameterLocation::parse)
    }

    /// The argument carrying the entire request body, for tools whose body
    /// is not a JSON object.
    pub fn request_body_argument(&self) -> Option<&'static str> {
        self.input_schema
            .get("properties")?
            .get(BODY_ARGUMENT)?
            .get(REQUEST_BODY_KEY)?
            .as_bool()
            .filter(|whole| *whole)
            .map(|_| BODY_ARGUMENT)
    }

    /// True when the schema declares properties at all; without them the
    /// pipeline falls back to structural path matching.
    pub fn has_properties(&self) -> bool {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .is_some_and(|m| !m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_schema_tags_locations() {
        let ep = Endpoint::new("get", "/items/{id}")
            .with_parameter("id", ParameterLocation::Path, true)
            .with_parameter("format", ParameterLocation::Query, false);
        let schema = ep.input_schema();
        assert_eq!(schema["properties"]["id"][LOCATION_KEY], "path");
        assert_eq!(schema["properties"]["format"][LOCATION_KEY], "query");
        assert_eq!(schema["required"], json!(["id"]));
        assert_eq!(ep.method, "GET");
    }

    #[test]
    fn object_request_body_is_flattened() {
        let mut ep = Endpoint::new("POST", "/pets");
        ep.request_body = Some(json!({
            "type": "object",
            "properties": {"name": {"type": "string"}, "age": {"type": "integer"}},
            "required": ["name"]
        }));
        let schema = ep.input_schema();
        assert_eq!(schema["properties"]["name"][LOCATION_KEY], "body");
        assert_eq!(schema["properties"]["age"]["type"], "integer");
        assert_eq!(schema["required"], json!(["name"]));
    }

    #[test]
    fn non_object_body_sits_under_body_key() {
        let mut ep = Endpoint::new("PUT", "/tags");
        ep.request_body = Some(json!({"type": "array", "items": {"type": "string"}}));
        let schema = ep.input_schema();
        assert_eq!(schema["properties"]["body"]["type"], "array");
        assert_eq!(schema["properties"]["body"][LOCATION_KEY], "body");
        assert_eq!(schema["properties"]["body"][REQUEST_BODY_KEY], true);
    }

    #[test]
    fn only_non_object_bodies_have_a_body_argument() {
        let def = |ep: &Endpoint| ToolDefinition {
            id: ep.tool_id(),
            name: "t".into(),
            description: String::new(),
            input_schema: ep.input_schema(),
        };
        let mut tags = Endpoint::new("PUT", "/tags");
        tags.request_body = Some(json!({"type": "array"}));
        assert_eq!(def(&tags).request_body_argument(), Some(BODY_ARGUMENT));

        let mut note = Endpoint::new("POST", "/notes");
        note.request_body = Some(json!({"type": "object", "properties": {"body": {"type": "string"}}}));
        assert_eq!(def(&note).request_body_argument(), None);
    }

    #[test]
    fn tool_definition_reports_parameter_location() {
        let ep = Endpoint::new("GET", "/items/{id}").with_parameter("id", ParameterLocation::Path, true);
        let def = ToolDefinition {
            id: ep.tool_id(),
            name: "getItem".into(),
            description: String::new(),
            input_schema: ep.input_schema(),
        };
        assert_eq!(def.parameter_location("id"), Some(ParameterLocation::Path));
        assert_eq!(def.parameter_location("missing"), None);
        assert!(def.has_properties());
    }

    #[test]
    fn location_parse_round_trips() {
        for loc in [
            ParameterLocation::Path,
            ParameterLocation::Query,
            ParameterLocation::Header,
            ParameterLocation::Cookie,
            ParameterLocation::Body,
        ] {
            assert_eq!(ParameterLocation::parse(loc.as_str()), Some(loc));
        }
        assert_eq!(ParameterLocation::parse("matrix"), None);
    }
}
