//! Structured logging setup.
//!
//! Verbosity comes from `RUST_LOG` (default `info`); the output format is
//! either human-readable text or one JSON object per line.

use std::fmt;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{ProcessorError, Result};

const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// Newline-delimited JSON.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`ProcessorError::Config`] if a global subscriber is already set.
pub fn init(format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true).with_span_list(false))
            .try_init(),
    };

    installed.map_err(|e| ProcessorError::config(format!("failed to initialize logging: {e}")))
}
