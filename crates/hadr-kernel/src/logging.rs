//! Tracing bootstrap for binaries and test harnesses.

use std::str::FromStr;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info";

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(LoggingError::UnknownFormat(other.to_string())),
        }
    }
}

/// Failure to set up logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Neither `text` nor `json`.
    #[error("unknown log format '{0}', expected 'text' or 'json'")]
    UnknownFormat(String),
    /// The default filter directive did not parse.
    #[error("invalid log filter '{filter}'")]
    Filter {
        /// The rejected directive.
        filter: String,
        /// Parser error.
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
}

/// Install a global subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Safe to call more than once; only the first call installs anything, and
/// an already-installed foreign subscriber is left in place.
pub fn init_tracing(format: LogFormat, default_filter: &str) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter).map_err(|source| LoggingError::Filter {
            filter: default_filter.to_string(),
            source,
        })?,
    };

    LOGGER_INITIALIZED.get_or_init(|| {
        let registry = tracing_subscriber::registry().with(filter);
        let installed = match format {
            LogFormat::Json => registry
                .with(fmt::layer().json().with_target(true))
                .try_init(),
            LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
        };
        if installed.is_err() {
            tracing::debug!("global tracing subscriber already set, keeping it");
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_formats() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn repeated_init_is_harmless() {
        assert!(init_tracing(LogFormat::Text, DEFAULT_FILTER).is_ok());
        assert!(init_tracing(LogFormat::Json, "debug").is_ok());
    }
}
