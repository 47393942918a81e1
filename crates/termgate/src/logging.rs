//! Diagnostic logging setup.
//!
//! The gateway logs through `tracing`. The binary installs a
//! `tracing-subscriber` formatter writing to stderr; `RUST_LOG` takes
//! precedence over the configured level.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{GatewayError, Result};

/// Build the level filter: `RUST_LOG` when set, otherwise `level`.
pub fn filter(level: &str) -> Result<EnvFilter> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.is_empty() => EnvFilter::try_new(&directives)
            .map_err(|e| GatewayError::config(format!("RUST_LOG={directives:?}: {e}"))),
        _ => EnvFilter::try_new(level)
            .map_err(|e| GatewayError::config(format!("log level {level:?}: {e}"))),
    }
}

/// Install the global subscriber.
///
/// Fails if the level is invalid or a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = filter(&config.level)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    result.map_err(|e| GatewayError::config(format!("cannot install log subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_level() {
        if std::env::var(EnvFilter::DEFAULT_ENV).is_ok() {
            return;
        }
        assert!(filter("info").is_ok());
        assert!(filter("termgate=debug,russh=warn").is_ok());
        assert!(filter("termgate=loud").is_err());
    }
}
