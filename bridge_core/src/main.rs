//! `ovpn-bridge`: drive an external OpenVPN engine from the command line.
//!
//! Starts a session from the given engine configuration file, prints
//! status transitions as they happen and tears the session down on
//! Ctrl-C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use bridge_core::SessionController;
use bridge_core::engine::ProcessEngine;
use bridge_shared::logging;
use bridge_shared::settings::BridgeSettings;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to the OpenVPN configuration file to run
    config: PathBuf,

    /// Path to a TOML settings file; defaults are used when absent
    #[clap(short, long)]
    settings: Option<PathBuf>,

    /// Log level
    #[clap(short, long, default_value = "info")]
    log_level: String,

    /// Engine binary to spawn
    #[clap(long)]
    engine: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = match &args.settings {
        Some(path) => BridgeSettings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => BridgeSettings::default(),
    };
    settings.log_level = args.log_level.clone();
    if let Some(engine) = &args.engine {
        settings.engine_command = engine.clone();
    }

    let _log_guard = logging::init_from_settings(&settings);

    let config_text = tokio::fs::read_to_string(&args.config)
        .await
        .with_context(|| format!("failed to read {}", args.config.display()))?;

    let device = new_device()?;
    let engine = Arc::new(ProcessEngine::new(settings.engine_command.clone()));
    let controller = SessionController::new(settings, device, engine);

    info!(config = %args.config.display(), "starting tunnel session");
    controller
        .connect(&config_text)
        .await
        .context("failed to start the tunnel session")?;

    let mut status_rx = controller.watch_status();
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    loop {
        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *status_rx.borrow();
                info!(%status, "session status changed");
                if let Some(stats) = controller.statistics() {
                    info!(
                        bytes_received = stats.bytes_received,
                        bytes_sent = stats.bytes_sent,
                        "traffic counters"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down");
                break;
            }
        }
    }

    controller.disconnect().await;
    info!("session closed");
    Ok(())
}

#[cfg(target_os = "linux")]
fn new_device() -> Result<Arc<dyn bridge_core::device::DeviceConfigurator>> {
    Ok(Arc::new(bridge_core::device::TunDeviceConfigurator::new()))
}

#[cfg(not(target_os = "linux"))]
fn new_device() -> Result<Arc<dyn bridge_core::device::DeviceConfigurator>> {
    anyhow::bail!("TUN device configuration is only supported on Linux")
}
