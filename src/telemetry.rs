//! Structured logging setup using the tracing crate.
//!
//! The library itself only emits `tracing` events; installing a
//! subscriber is the embedding process's call. This module gives the CLI
//! (and tests that want output) a small builder over tracing-subscriber
//! with pretty, compact, and JSON formats.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line human format
    Pretty,
    /// Single-line human format
    #[default]
    Compact,
    /// Newline-delimited JSON for log shippers
    Json,
}

/// Verbosity threshold when no filter directive is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Maps `-v` counts to levels.
    pub fn from_verbosity(verbosity: u8) -> Self {
        match verbosity {
            0 => LogLevel::Info,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    fn directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Builder for installing the global subscriber.
pub struct LoggingBuilder {
    level: LogLevel,
    format: LogFormat,
    ansi: bool,
    filter: Option<String>,
}

impl LoggingBuilder {
    /// Create a new logging builder with default configuration.
    pub fn new() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            ansi: true,
            filter: None,
        }
    }

    /// Set the log level.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set the log format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set ANSI colors.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }

    /// Set an explicit filter directive, e.g. `craftops=debug,russh=warn`.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Build and install the global subscriber. `RUST_LOG` wins over the
    /// configured level when set.
    pub fn init(self) -> Result<()> {
        let env_filter = self.build_filter();

        match self.format {
            LogFormat::Pretty => {
                let layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_ansi(self.ansi)
                    .with_target(true)
                    .with_span_events(FmtSpan::NONE);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer)
                    .try_init()
            }
            LogFormat::Compact => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_ansi(self.ansi)
                    .with_target(true)
                    .with_span_events(FmtSpan::NONE);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer)
                    .try_init()
            }
            LogFormat::Json => {
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer)
                    .try_init()
            }
        }
        .map_err(|e| Error::Configuration(e.to_string()))
    }

    fn build_filter(&self) -> EnvFilter {
        if let Some(ref filter) = self.filter {
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(filter))
                .unwrap_or_else(|_| EnvFilter::new(self.level.directive()))
        } else {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.level.directive()))
        }
    }
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_settings() {
        let builder = LoggingBuilder::new()
            .with_level(LogLevel::Debug)
            .with_format(LogFormat::Json)
            .with_ansi(false);

        assert_eq!(builder.level, LogLevel::Debug);
        assert_eq!(builder.format, LogFormat::Json);
        assert!(!builder.ansi);
    }

    #[test]
    fn verbosity_mapping() {
        assert_eq!(LogLevel::from_verbosity(0), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(1), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(4), LogLevel::Trace);
    }
}
