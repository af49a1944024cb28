use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use mindflow_api::config::Config;
use mindflow_api::{build_state, routes};
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "MindFlow: The PDF Teacher")]
struct Cli {
    /// Address to listen on; overrides BIND_ADDRESS
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load application configuration")?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting MindFlow...");
    if config.transcription_api_key.is_none() {
        tracing::warn!("TRANSCRIPTION_API_KEY is not set; voice answers will not be transcribed");
    }
    match mindflow_native_utils::device::get_available_inputs() {
        Ok(inputs) => tracing::debug!("Available input devices:\n{}", inputs),
        Err(e) => tracing::warn!("Could not list input devices: {:#}", e),
    }

    // --- 3. Build the app ---
    let bind_address = config.bind_address;
    let max_upload_bytes = config.max_upload_bytes;
    let app = routes::router(build_state(config), max_upload_bytes);

    // --- 4. Serve ---
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    tracing::info!("MindFlow listening on http://{}", bind_address);
    axum::serve(listener, app)
        .await
        .context("HTTP server stopped unexpectedly")?;

    Ok(())
}
