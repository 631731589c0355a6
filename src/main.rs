//! `a2a-gateway` binary.

use a2a_gateway::a2a::server;
use a2a_gateway::config::{GatewayConfig, LoadedConfig};
use a2a_gateway::logging;
use clap::Parser;
use std::path::PathBuf;

/// Agent-to-agent task coordination gateway
#[derive(Parser, Debug)]
#[command(name = "a2a-gateway", version, about)]
struct Cli {
    /// Config file (defaults to ~/.a2a-gateway/config.toml)
    #[arg(short, long, env = "A2A_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let LoadedConfig {
        mut config,
        ignored_env,
    } = GatewayConfig::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.validate()?;

    logging::init_logging(config.log_format)?;
    for key in &ignored_env {
        tracing::warn!("Ignoring unknown rate limit variable {}", key);
    }
    tracing::debug!(?config, "A2A: configuration loaded");

    server::start_server(&config).await
}
