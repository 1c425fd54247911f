//! Structured logging configuration.
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and either
//! a JSON layer (production) or a pretty text layer (development).
//!
//! `RUST_LOG` takes precedence over the configured level, so a single crate
//! can be turned up without touching the config file:
//!
//! ```text
//! RUST_LOG=info,docbatch_domain::loader=debug
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use docbatch_server::config::ServerConfig;
//! use docbatch_server::observability::{init_logging, LoggingConfig};
//!
//! let config = ServerConfig::load("docbatch.yaml")?;
//! init_logging(LoggingConfig::from_settings(&config.logging)?);
//! ```

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use crate::config::{ConfigLoadError, LoggingSettings};

/// Configuration for structured logging.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// JSON lines when true, pretty text otherwise
    pub json_format: bool,
    /// Level used when RUST_LOG is not set
    pub default_level: Level,
    /// Emit span close events, which carry the unit-of-work timings
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_format: false,
            default_level: Level::INFO,
            include_spans: false,
        }
    }
}

impl LoggingConfig {
    pub fn json() -> Self {
        Self {
            json_format: true,
            ..Default::default()
        }
    }

    pub fn text() -> Self {
        Self::default()
    }

    /// Builds the logging configuration from the `logging` config section.
    pub fn from_settings(settings: &LoggingSettings) -> Result<Self, ConfigLoadError> {
        let level =
            Level::from_str(&settings.level).map_err(|_| ConfigLoadError::Invalid {
                message: format!("unknown log level: {}", settings.level),
            })?;
        Ok(Self {
            json_format: settings.json,
            default_level: level,
            include_spans: false,
        })
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.include_spans = true;
        self
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Installs the global subscriber.
///
/// Call once at startup. Later calls leave the first subscriber in place.
pub fn init_logging(config: LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.to_string()));
    let span_events = config.span_events();

    let result = if config.json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_current_span(true)
                .with_target(true)
                .with_file(false)
                .with_line_number(false),
        );
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_target(true),
        );
        tracing::subscriber::set_global_default(subscriber)
    };

    if result.is_err() {
        tracing::debug!("global subscriber already installed");
    }
}

/// A JSON subscriber writing every event to `writer`, for asserting on logs
/// in tests.
pub fn capture_json_subscriber<W>(writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'writer> fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::registry().with(EnvFilter::new("trace")).with(
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_current_span(true),
    )
}
