use clap::{Parser, Subcommand};
use std::process::ExitCode;

use crate::clients::api_client::ApiClient;
use crate::core::tool_id;
use crate::infra::config::Config;
use crate::infra::http::headers::SESSION_HEADER;
use crate::tools::catalog::EndpointCatalog;
use crate::tools::registry::{RegistryOptions, ToolRegistry};

#[derive(Parser)]
#[command(name = "openapi-mcp-gateway")]
#[command(about = "OpenAPI to MCP gateway")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway (default)
    Serve(ServeArgs),
    /// Health check the service
    Health {
        /// Service URL to check
        #[arg(short, long, default_value = "http://localhost:8080")]
        url: String,
    },
    /// Validate configuration
    Config {
        /// Validate config without starting service
        #[arg(long)]
        validate: bool,
    },
    /// Probe health and run an initialize handshake against the endpoint
    Status {
        /// Service URL to check
        #[arg(short, long, default_value = "http://localhost:8080")]
        url: String,
        /// MCP endpoint path
        #[arg(long, default_value = "/mcp")]
        path: String,
    },
    /// Print the tools an OpenAPI document would produce
    ListTools {
        /// OpenAPI JSON document
        #[arg(short, long)]
        spec: String,
    },
    /// Encode or decode a tool id
    ToolId {
        #[command(subcommand)]
        action: ToolIdAction,
    },
}

#[derive(Subcommand)]
pub enum ToolIdAction {
    /// METHOD and path -> tool id
    Encode { method: String, path: String },
    /// tool id -> METHOD and path
    Decode { id: String },
}

#[derive(clap::Args, Default, Debug, Clone)]
pub struct ServeArgs {
    /// server or stdio
    #[arg(long)]
    pub mode: Option<String>,
    #[arg(long)]
    pub host: Option<String>,
    #[arg(short, long)]
    pub port: Option<u16>,
    /// OpenAPI JSON document
    #[arg(long)]
    pub spec: Option<String>,
    /// Downstream API base URL
    #[arg(long)]
    pub base_url: Option<String>,
}

impl ServeArgs {
    /// CLI flags win over file and environment.
    pub fn apply(self, cfg: &mut Config) {
        if let Some(mode) = self.mode {
            cfg.mode = mode;
        }
        if let Some(host) = self.host {
            cfg.host = host;
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(spec) = self.spec {
            cfg.openapi_spec = Some(spec);
        }
        if let Some(base_url) = self.base_url {
            cfg.api_base_url = Some(base_url);
        }
    }
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();

    run_commands(cli.command.unwrap_or(Commands::Serve(ServeArgs::default()))).await
}

pub async fn run_commands(command: Commands) -> ExitCode {
    match command {
        Commands::Serve(args) => match serve(args).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "gateway stopped");
                eprintln!("❌ {e:#}");
                ExitCode::FAILURE
            }
        },
        Commands::Health { url } => match health_check(&url).await {
            Ok(_) => {
                println!("✅ Service is healthy");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Health check failed: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Config { validate: _ } => match validate_config() {
            Ok(_) => {
                println!("✅ Configuration is valid");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Configuration validation failed: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Status { url, path } => match show_status(&url, &path).await {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("❌ Status check failed: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::ListTools { spec } => match list_tools(&spec) {
            Ok(lines) => {
                for line in lines {
                    println!("{line}");
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Could not load {}: {}", spec, e);
                ExitCode::FAILURE
            }
        },
        Commands::ToolId { action } => {
            println!("{}", run_tool_id(action));
            ExitCode::SUCCESS
        }
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut cfg = Config::load()?;
    args.apply(&mut cfg);
    crate::infra::boot::run_server(cfg).await
}

async fn health_check(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/healthz", url))
        .timeout(std::time::Duration::from_millis(500))
        .send()
        .await?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(format!("HTTP {}", response.status()).into())
    }
}

fn validate_config() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    config.validate()?;
    Ok(())
}

async fn show_status(url: &str, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = reqwest::Client::new();

    let health_response = client
        .get(format!("{}/healthz", url))
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await?;

    println!(
        "🏥 Health Status: {}",
        if health_response.status().is_success() {
            "✅ Healthy"
        } else {
            "❌ Unhealthy"
        }
    );

    let endpoint = format!("{}{}", url, path);
    let init = client
        .post(&endpoint)
        .header("content-type", "application/json")
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"protocolVersion": crate::core::mcp::DEFAULT_PROTOCOL_VERSION}
        }))
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await;

    match init {
        Ok(resp) if resp.status().is_success() => {
            let session = resp
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            match session {
                Some(sid) => {
                    println!("🔌 MCP: ✅ Session handshake ok");
                    let _ = client.delete(&endpoint).header(SESSION_HEADER, sid).send().await;
                }
                None => println!("🔌 MCP: ❌ No session id returned"),
            }
        }
        Ok(resp) => println!("🔌 MCP: ❌ HTTP {}", resp.status()),
        Err(_) => println!("🔌 MCP: ❌ Unavailable"),
    }

    let cfg = Config::from_env();
    println!("\n📋 Configuration:");
    println!("  Mode: {}", cfg.mode);
    println!("  Port: {}", cfg.port);
    println!("  Tools mode: {}", cfg.tools_mode);
    println!(
        "  Log Level: {}",
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into())
    );
    match cfg.api_base_url {
        Some(base) => println!("  Downstream API: {}", base),
        None => println!("  Downstream API: Not configured"),
    }

    Ok(())
}

fn list_tools(spec: &str) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let catalog = EndpointCatalog::load(spec)?;
    let api = ApiClient::from_static_headers("", Default::default());
    let registry = ToolRegistry::new(catalog, api, RegistryOptions::default());
    Ok(registry
        .all_endpoint_tools()
        .iter()
        .map(|t| format!("{}\t{}", t.name, t.id))
        .collect())
}

fn run_tool_id(action: ToolIdAction) -> String {
    match action {
        ToolIdAction::Encode { method, path } => tool_id::encode(&method, &path),
        ToolIdAction::Decode { id } => {
            let (method, path) = tool_id::decode(&id);
            format!("{method} {path}")
        }
    }
}
