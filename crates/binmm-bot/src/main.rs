//! binmm control loop entry point.

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Inventory-safety core for a binary-market market maker
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via BINMM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    binmm_telemetry::init_logging()?;

    info!("Starting binmm v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > BINMM_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("BINMM_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = binmm_bot::AppConfig::from_file(&config_path)?;
    info!(mode = ?config.mode, account = %config.account, "Configuration loaded");

    let mut app = binmm_bot::Application::new(config)?;
    let inventory = app.start().await?;
    if inventory.has_inventory() {
        warn!(
            positions = inventory.positions.len(),
            "Existing inventory adopted; exits are enforced before any entry"
        );
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    app.run(shutdown).await?;
    Ok(())
}
