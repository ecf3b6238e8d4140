//! HealWatch: error-pattern detection, automated Java remediation and
//! cross-platform correlation for e-commerce services.
//!
//! Main entry point that wires all subsystems and starts the server.

use clap::Parser;
use healwatch_api::ApiServer;
use healwatch_core::config::AppConfig;
use healwatch_engine::Services;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "healwatch")]
#[command(about = "Self-healing monitoring for e-commerce services")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); environment variables win over it
    #[arg(long, short, env = "HEALWATCH_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "HEALWATCH__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "HEALWATCH__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Remediation workspace checkout (overrides config)
    #[arg(long, env = "HEALWATCH__REMEDIATION__WORKSPACE_PATH")]
    workspace: Option<String>,

    /// Serve the API without starting periodic tasks
    #[arg(long, default_value_t = false)]
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "healwatch=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();
    info!("HealWatch starting up");

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(workspace) = cli.workspace {
        config.remediation.workspace_path = workspace;
    }

    for problem in config.validation_errors() {
        warn!(problem = %problem, "Configuration problem");
    }
    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        workspace = %config.remediation.workspace_path,
        "Configuration loaded"
    );

    let services = Arc::new(Services::build(config.clone())?);
    if cli.no_scheduler {
        info!("Periodic tasks disabled");
    } else {
        services.start();
    }

    let api_server = ApiServer::new(config, services.clone());
    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("HealWatch is ready to accept events");

    tokio::select! {
        result = api_server.start_http() => {
            if let Err(e) = &result {
                error!(error = %e, "HTTP server stopped");
            }
            services.shutdown().await;
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            services.shutdown().await;
            Ok(())
        }
    }
}
