//! Processor error types.
//!
//! Errors never cross the request boundary: the direction router turns every
//! failure into a rejection (inbound) or a passthrough (outbound). They exist
//! so that logs carry the precise cause.

use std::path::PathBuf;

use authbridge_authn::AuthError;
use thiserror::Error;

/// Errors raised while configuring the processor or exchanging tokens.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProcessorError {
    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A credential file could not be read.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The token endpoint answered the exchange with a non-2xx status.
    #[error("Token exchange rejected with status {status}: {message}")]
    ExchangeStatus {
        /// HTTP status code.
        status: u16,
        /// OAuth error (and description) from the response body, if any.
        message: String,
    },

    /// The token endpoint could not be reached or timed out.
    #[error("Token exchange request failed: {0}")]
    ExchangeTransport(#[source] reqwest::Error),

    /// The token endpoint answered 2xx with an unusable body.
    #[error("Malformed token exchange response: {0}")]
    MalformedResponse(String),

    /// Token verification failure.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ProcessorError {
    /// Creates a [`ProcessorError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a [`ProcessorError::Io`].
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Creates a [`ProcessorError::MalformedResponse`].
    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }
}

/// Result type alias for processor operations.
pub type Result<T> = std::result::Result<T, ProcessorError>;
