//! Tracing setup for the binary.
//!
//! Logs go to stderr so stdout only carries the final timing line.
//! `RUST_LOG` takes precedence over the configured default filter.

use std::str::FromStr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::types::EtlError;

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(EtlError::Config(format!("invalid log format: {other}"))),
        }
    }
}

/// Installs the global subscriber. `default_filter` is used when `RUST_LOG`
/// is unset, e.g. `"info"` or `"user_etl=debug"`.
pub fn init_logging(default_filter: &str, format: LogFormat) -> Result<(), EtlError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| EtlError::Config(format!("invalid log filter: {e}")))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };

    result.map_err(|e| EtlError::Config(format!("failed to install logger: {e}")))
}
