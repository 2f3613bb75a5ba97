/// datasync: daily data synchronization orchestrator
///
/// Main entry point. Loads configuration and starts the HTTP server together with
/// the periodic sync triggers.

use datasync::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Sync trigger and history API at /api/sync/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // DATASYNC_CONFIG names a JSON file; otherwise env-var backed defaults
    let config = Config::load()?;

    start_server(config).await?;

    Ok(())
}
