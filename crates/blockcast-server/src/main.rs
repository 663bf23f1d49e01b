//! # Blockcast Server
//!
//! Real-time collaboration server: clients editing the same project see each
//! other's edits, updates and cursor moves as they happen.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! blockcast
//!
//! # Run with a specific config file
//! blockcast --config /path/to/blockcast.toml
//!
//! # Run with environment variables
//! PORT=8080 BLOCKCAST_HUB__ENCODING=msgpack blockcast
//! ```

mod config;
mod handlers;
mod metrics;
mod session;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "blockcast", version, about = "Real-time collaboration server", long_about = None)]
struct Cli {
    /// Read configuration from this TOML file instead of the default search
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blockcast_server=debug,blockcast_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting Blockcast server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
