//! # ble2ws-logging
//!
//! Installs the process-wide `tracing` subscriber: a `fmt` layer writing to
//! stderr in pretty or JSON form, filtered by `RUST_LOG` when set and by the
//! configured level otherwise.

#![deny(unsafe_code)]

use ble2ws_settings::{LogFormat, LoggingSettings};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Subscriber installation failure.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Filter from `RUST_LOG`, else `level`, else `info`.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Fails if one is already set.
pub fn init_subscriber(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let filter = build_filter(&settings.level);
    let registry = tracing_subscriber::registry().with(filter);

    match settings.format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_falls_back() {
        let filter = build_filter("=[not a directive");
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn second_init_reports_error() {
        let settings = LoggingSettings::default();
        let _ = init_subscriber(&settings);
        assert!(init_subscriber(&settings).is_err());
    }
}
