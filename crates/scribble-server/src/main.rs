//! # Scribble Server
//!
//! Shared whiteboard history server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! scribble
//!
//! # Run with custom config
//! scribble --config /path/to/scribble.toml
//!
//! # Run with environment overrides
//! SCRIBBLE__PORT=8080 SCRIBBLE__HOST=0.0.0.0 scribble
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "scribble")]
#[command(about = "Shared whiteboard history server")]
#[command(version)]
struct Cli {
    /// Configuration file (searched in the default locations if omitted)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scribble=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load(cli.config.as_deref())?;

    tracing::info!("Starting Scribble server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
