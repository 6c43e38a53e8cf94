//! # Switchboard Server
//!
//! Real-time WebSocket message hub.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! switchboard
//!
//! # Run with custom config
//! switchboard --config /path/to/switchboard.toml
//!
//! # Run with environment variables
//! SWITCHBOARD_PORT=8080 SWITCHBOARD_HOST=0.0.0.0 switchboard
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use switchboard_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(about = "Real-time WebSocket message hub")]
#[command(version)]
struct Cli {
    /// Config file path (optional)
    #[arg(short, long, env = "SWITCHBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "switchboard=trace"
    } else {
        "switchboard=debug"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load(cli.config.as_deref())?;

    tracing::info!(
        "Starting Switchboard server on {}:{}",
        config.host,
        config.port
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
