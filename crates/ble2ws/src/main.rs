//! # ble2ws
//!
//! BLE WebSocket bridge binary: loads settings, installs logging and
//! metrics, starts the radio backend and serves the bridge until ctrl-c.

#![deny(unsafe_code)]

mod backend;

use std::path::PathBuf;

use anyhow::{Context, Result};
use ble2ws_bridge::Bridge;
use ble2ws_core::adapter::event_channel;
use ble2ws_server::config::ServerConfig;
use ble2ws_server::server::BridgeServer;
use ble2ws_settings::{LogFormat, Settings};
use clap::Parser;

use crate::backend::Backend;

/// Bluetooth Low Energy to WebSocket bridge.
#[derive(Parser, Debug)]
#[command(name = "ble2ws", version, about = "Bluetooth Low Energy to WebSocket bridge")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.ble2ws/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `ble2ws_bridge=trace` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format (overrides settings).
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,

    /// Radio backend.
    #[arg(long, value_enum, default_value_t = Backend::default())]
    backend: Backend,
}

impl Cli {
    fn settings_file(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(ble2ws_settings::settings_path)
    }

    /// CLI flags win over file and environment.
    fn apply(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

fn parse_log_format(text: &str) -> Result<LogFormat, String> {
    LogFormat::parse(text).ok_or_else(|| format!("unknown log format '{text}' (expected pretty or json)"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.settings_file();
    let mut settings = ble2ws_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    ble2ws_logging::init_subscriber(&settings.logging).context("Failed to initialise logging")?;

    let metrics = match ble2ws_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics disabled");
            None
        }
    };

    let (events_tx, events_rx) = event_channel();
    let radio = backend::start(cli.backend, events_tx)
        .await
        .context("Failed to start radio backend")?;

    let bridge = Bridge::new(radio.adapter.clone(), &settings.bridge);
    let pump = bridge.spawn_event_pump(events_rx);

    let server = BridgeServer::new(ServerConfig::from(&settings.server), bridge, metrics);
    let (addr, handle) = server
        .listen()
        .await
        .with_context(|| format!("Failed to bind {}", server.config().bind_addr()))?;
    server.shutdown().track(handle);
    server.shutdown().track(pump);

    tracing::info!(backend = ?cli.backend, "ble2ws listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    server.shutdown_gracefully(None).await;
    for task in radio.tasks {
        task.abort();
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_keep_settings() {
        let cli = Cli::parse_from(["ble2ws"]);
        let mut settings = Settings::default();
        cli.apply(&mut settings);
        assert_eq!(settings, Settings::default());
        assert_eq!(cli.backend, Backend::default());
    }

    #[test]
    fn flags_override_settings() {
        let cli = Cli::parse_from([
            "ble2ws",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--log-level",
            "debug",
            "--log-format",
            "json",
            "--backend",
            "simulated",
        ]);
        let mut settings = Settings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(cli.backend, Backend::Simulated);
    }

    #[test]
    fn bad_log_format_rejected() {
        assert!(Cli::try_parse_from(["ble2ws", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn explicit_config_path_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("settings.json");
        std::fs::write(&file, r#"{"server": {"port": 9100}}"#).unwrap();

        let cli = Cli::parse_from(["ble2ws", "--config", file.to_str().unwrap()]);
        assert_eq!(cli.settings_file(), file);
        let settings = ble2ws_settings::read_settings_file(&cli.settings_file()).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    #[test]
    fn default_settings_file_under_home() {
        let cli = Cli::parse_from(["ble2ws"]);
        assert!(cli.settings_file().ends_with(".ble2ws/settings.json"));
    }
}
