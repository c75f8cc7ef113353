use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::core::error::GatewayError;
use crate::infra::runtime::limits::{DEFAULT_MAX_BODY_BYTES, DEFAULT_SYNC_RESPONSE_TIMEOUT};

/// Which tools `tools/list` advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolsMode {
    /// Every catalog endpoint, subject to the include filters.
    All,
    /// Only the meta tools; endpoints are reached through them.
    Dynamic,
    /// Only tools named in `include_tools`.
    Explicit,
}

impl ToolsMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "all" => Some(ToolsMode::All),
            "dynamic" => Some(ToolsMode::Dynamic),
            "explicit" => Some(ToolsMode::Explicit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: String, // "server" or "stdio"
    pub host: String,
    pub port: u16,
    pub endpoint_path: String,
    pub api_base_url: Option<String>,
    pub openapi_spec: Option<String>,
    pub headers: HashMap<String, String>,
    pub max_body_bytes: usize,
    pub sync_response_timeout_secs: u64,
    pub tools_mode: String,
    pub include_tools: Vec<String>,
    pub include_operations: Vec<String>,
    pub allowed_origins: Vec<String>,
    pub server_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: "server".into(),
            host: "127.0.0.1".into(),
            port: 8080,
            endpoint_path: "/mcp".into(),
            api_base_url: None,
            openapi_spec: None,
            headers: HashMap::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            sync_response_timeout_secs: DEFAULT_SYNC_RESPONSE_TIMEOUT.as_secs(),
            tools_mode: "all".into(),
            include_tools: Vec::new(),
            include_operations: Vec::new(),
            allowed_origins: Vec::new(),
            server_name: "openapi-mcp-gateway".into(),
        }
    }
}

impl Config {
    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    /// TOML file named by `GATEWAY_CONFIG` (when set), then environment.
    pub fn load() -> Result<Self, GatewayError> {
        let mut cfg = match std::env::var("GATEWAY_CONFIG") {
            Ok(path) if !path.trim().is_empty() => {
                let raw = std::fs::read_to_string(path.trim())?;
                Self::from_toml_str(&raw)?
            }
            _ => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, GatewayError> {
        toml::from_str(raw).map_err(|e| GatewayError::Config(e.to_string()))
    }

    fn apply_env(&mut self) {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(v) = var("MODE") {
            self.mode = v;
        }
        if let Some(v) = var("HOST") {
            self.host = v;
        }
        if let Some(port) = var("PORT").and_then(|s| s.parse::<u16>().ok()) {
            self.port = port;
        }
        if let Some(v) = var("ENDPOINT_PATH") {
            self.endpoint_path = v;
        }
        if let Some(v) = var("API_BASE_URL") {
            self.api_base_url = Some(v);
        }
        if let Some(v) = var("OPENAPI_SPEC_PATH") {
            self.openapi_spec = Some(v);
        }
        if let Some(v) = var("API_HEADERS") {
            self.headers.extend(parse_headers(&v));
        }
        if let Some(n) = var("MAX_BODY_BYTES").and_then(|s| s.parse::<usize>().ok()) {
            self.max_body_bytes = n;
        }
        if let Some(n) = var("SYNC_RESPONSE_TIMEOUT_SECS").and_then(|s| s.parse::<u64>().ok()) {
            self.sync_response_timeout_secs = n;
        }
        if let Some(v) = var("TOOLS_MODE") {
            self.tools_mode = v;
        }
        if let Some(v) = var("INCLUDE_TOOLS") {
            self.include_tools = parse_list(&v);
        }
        if let Some(v) = var("INCLUDE_OPERATIONS") {
            self.include_operations = parse_list(&v);
        }
        if let Some(v) = var("ALLOWED_ORIGINS") {
            self.allowed_origins = parse_list(&v);
        }
        if let Some(v) = var("SERVER_NAME") {
            self.server_name = v;
        }
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if !matches!(self.mode.as_str(), "server" | "stdio") {
            return Err(GatewayError::Config(format!(
                "Invalid MODE: {}. Must be 'server' or 'stdio'",
                self.mode
            )));
        }
        if ToolsMode::parse(&self.tools_mode).is_none() {
            return Err(GatewayError::Config(format!(
                "Invalid TOOLS_MODE: {}. Must be 'all', 'dynamic' or 'explicit'",
                self.tools_mode
            )));
        }
        if self.mode == "server" {
            if self.port == 0 {
                return Err(GatewayError::Config("PORT cannot be 0".into()));
            }
            if !self.endpoint_path.starts_with('/') {
                return Err(GatewayError::Config(format!(
                    "ENDPOINT_PATH must start with '/': {}",
                    self.endpoint_path
                )));
            }
            if self.max_body_bytes == 0 {
                return Err(GatewayError::Config("MAX_BODY_BYTES cannot be 0".into()));
            }
        }
        Ok(())
    }

    pub fn tools_mode(&self) -> ToolsMode {
        ToolsMode::parse(&self.tools_mode).unwrap_or(ToolsMode::All)
    }

    pub fn sync_response_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_response_timeout_secs.max(1))
    }
}

/// `name:value,name:value` -> header map. Entries without a colon are skipped.
pub fn parse_headers(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
