//! Moonraker Monitor
//!
//! Keeps a client connected to a Moonraker host and logs every print
//! lifecycle event it translates, with the ETA on progress updates.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use moonraker_client::{
    ClientConfig, EventChannelSink, LifecycleEvent, MoonrakerClient, PrinterStateApi,
};

/// Moonraker Monitor: print lifecycle events from a Moonraker host
#[derive(Parser, Debug)]
#[command(name = "moonraker-monitor")]
#[command(about = "Connect to Moonraker and log print lifecycle events")]
struct Args {
    /// Moonraker's own config file, read for the [server] host and port
    #[arg(long)]
    moonraker_config: Option<PathBuf>,

    /// TOML file with client settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
    Ok(())
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            ClientConfig::from_toml_str(&content)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => ClientConfig::default(),
    };
    if let Some(path) = &args.moonraker_config {
        config.moonraker_config_path = path.clone();
    }
    Ok(config)
}

async fn log_events(
    mut events: UnboundedReceiver<LifecycleEvent>,
    printer: Arc<dyn PrinterStateApi>,
) {
    while let Some(event) = events.recv().await {
        match event {
            LifecycleEvent::Started {
                file_name,
                restored,
            } => info!(%file_name, restored, "Print started"),
            LifecycleEvent::Paused { file_name } => info!(?file_name, "Print paused"),
            LifecycleEvent::Resumed { file_name } => info!(?file_name, "Print resumed"),
            LifecycleEvent::Progress { percent } => {
                let eta_secs = printer.estimate_remaining_seconds().await;
                info!(percent = format_args!("{percent:.1}"), eta_secs, "Print progress");
            }
            LifecycleEvent::HeightMilestone => info!("First layer complete"),
            LifecycleEvent::Done {
                file_name,
                duration_secs,
            } => info!(?file_name, ?duration_secs, "Print done"),
            LifecycleEvent::Failed {
                file_name,
                duration_secs,
                reason,
            } => warn!(%file_name, %duration_secs, %reason, "Print failed"),
            LifecycleEvent::Error { message } => warn!(%message, "Printer error"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let config = load_config(&args)?;
    info!(
        moonraker_config = %config.moonraker_config_path.display(),
        "Starting Moonraker monitor"
    );

    let (sink, events) = EventChannelSink::new();
    let client = MoonrakerClient::new(config, Arc::new(sink))?;
    client.start();
    let logger = tokio::spawn(log_events(events, client.printer()));

    info!("Monitor is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    client.close().await;
    client.shutdown().await;
    logger.abort();
    Ok(())
}
