//! # herald
//!
//! Notification relay binary: loads settings, starts the HTTP/WebSocket
//! server, and runs until Ctrl-C.

#![deny(unsafe_code)]

mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use herald_server::metrics::install_recorder;
use herald_server::{NotificationServer, ServerConfig};
use herald_settings::{HeraldSettings, apply_env_overrides, load_settings_from_path, settings_path};

/// Real-time notification relay.
#[derive(Parser, Debug)]
#[command(name = "herald", about = "Real-time notification relay")]
struct Cli {
    /// Settings file (defaults to `$HERALD_SETTINGS` or `~/.herald/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings and `PORT`).
    #[arg(long)]
    port: Option<u16>,
}

impl Cli {
    fn settings_file(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(settings_path)
    }

    /// Apply `--host` / `--port` on top of loaded settings.
    fn apply(&self, settings: &mut HeraldSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
    }
}

/// Settings from file and environment. Never fails: a broken file falls back
/// to defaults plus environment overrides.
fn resolve_settings(cli: &Cli) -> (HeraldSettings, Option<String>) {
    let path = cli.settings_file();
    let (mut settings, warning) = match load_settings_from_path(&path) {
        Ok(settings) => (settings, None),
        Err(e) => {
            let mut fallback = HeraldSettings::default();
            apply_env_overrides(&mut fallback);
            if fallback.validate().is_err() {
                fallback = HeraldSettings::default();
            }
            let warning = format!("failed to load settings from {}: {e}", path.display());
            (fallback, Some(warning))
        }
    };
    cli.apply(&mut settings);
    (settings, warning)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Settings come first: they carry the log level.
    let (settings, warning) = resolve_settings(&cli);
    logging::init_subscriber(&settings.logging.level, settings.logging.format);
    if let Some(warning) = warning {
        tracing::warn!("{warning}, using defaults");
    }
    settings
        .validate()
        .context("invalid settings after command-line overrides")?;

    let metrics_handle = install_recorder().context("failed to install metrics recorder")?;
    let server = NotificationServer::new(ServerConfig::from(&settings.server), metrics_handle);

    let (addr, handle) = server.listen().await.context("failed to bind server")?;
    tracing::info!("herald listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    let drained = server.shutdown().graceful_shutdown(handle, None).await;
    tracing::info!(drained, "shutdown complete");
    Ok(())
}
