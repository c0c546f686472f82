// Claude Companion broker
//
// Serves companion clients over WebSocket on port 3001 by default and drives
// Claude Code agents on their behalf.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use kodegen_claude_companion::{BrokerConfig, VERSION, server};

#[derive(Parser)]
#[command(name = "kodegen-claude-companion")]
#[command(version)]
#[command(about = "Session broker that drives Claude Code agents for companion clients")]
struct Cli {
    /// Configuration file path (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind to
    #[arg(long)]
    bind: Option<String>,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory for the session snapshot and delivery queue
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Claude Code executable
    #[arg(long)]
    cli_path: Option<PathBuf>,

    /// Bearer token clients must present
    #[arg(long, env = "AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut BrokerConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(path) = self.cli_path {
            config.cli_path = Some(path);
        }
        if let Some(token) = self.auth_token.filter(|t| !t.is_empty()) {
            config.auth_token = Some(token);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let mut config = BrokerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    log::info!("Claude Companion {} starting", VERSION);
    let server = server::start(config)
        .await
        .context("Failed to start companion server")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    log::info!("Shutdown requested");
    server.shutdown().await;
    Ok(())
}
