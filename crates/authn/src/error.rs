//! Authentication error types.
//!
//! This module defines errors that can occur during JWT verification and
//! signing key resolution.

use thiserror::Error;

/// Authentication errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Malformed JWT - cannot be decoded.
    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// Token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Token not yet valid (nbf claim in future).
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Issuer doesn't match the configured issuer.
    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),

    /// Audience doesn't contain the expected value.
    #[error("Invalid audience: {0}")]
    InvalidAudience(String),

    /// Required claim is missing.
    #[error("Missing claim: {0}")]
    MissingClaim(String),

    /// Algorithm not in allowed list.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Signing key not present in the key set, even after a refresh.
    #[error("Signing key not found: {kid}")]
    KeyNotFound {
        /// Key ID that was not found.
        kid: String,
    },

    /// Invalid public key material in the key set.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The key set could not be fetched (transport error, timeout, non-2xx).
    #[error("Key set fetch failed from {source_url}: {message}")]
    KeySetFetch {
        /// Endpoint the key set was requested from.
        source_url: String,
        /// Description of the failure.
        message: String,
    },

    /// The key set document could not be parsed or held no usable keys.
    #[error("Invalid key set: {0}")]
    InvalidKeySet(String),

    /// No key set endpoint is configured.
    #[error("Signing key source not configured")]
    KeySourceNotConfigured,
}

impl AuthError {
    /// Creates an [`AuthError::InvalidTokenFormat`].
    pub fn invalid_token_format(message: impl Into<String>) -> Self {
        Self::InvalidTokenFormat(message.into())
    }

    /// Creates an [`AuthError::MissingClaim`].
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim(claim.into())
    }

    /// Creates an [`AuthError::InvalidIssuer`].
    pub fn invalid_issuer(message: impl Into<String>) -> Self {
        Self::InvalidIssuer(message.into())
    }

    /// Creates an [`AuthError::InvalidAudience`].
    pub fn invalid_audience(message: impl Into<String>) -> Self {
        Self::InvalidAudience(message.into())
    }

    /// Creates an [`AuthError::KeyNotFound`].
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates an [`AuthError::InvalidPublicKey`].
    pub fn invalid_public_key(message: impl Into<String>) -> Self {
        Self::InvalidPublicKey(message.into())
    }

    /// Creates an [`AuthError::KeySetFetch`].
    pub fn key_set_fetch(source_url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::KeySetFetch { source_url: source_url.into(), message: message.into() }
    }

    /// Creates an [`AuthError::InvalidKeySet`].
    pub fn invalid_key_set(message: impl Into<String>) -> Self {
        Self::InvalidKeySet(message.into())
    }

    /// Returns `true` when the error came from reaching the key set endpoint
    /// rather than from the token itself.
    ///
    /// Transient errors let the signing key cache keep serving its
    /// last-known-good key set.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::KeySetFetch { .. })
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => {
                AuthError::InvalidTokenFormat("Invalid JWT structure".into())
            },
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            ErrorKind::InvalidAudience => {
                AuthError::InvalidAudience("Audience validation failed".into())
            },
            ErrorKind::InvalidIssuer => AuthError::InvalidIssuer("Issuer validation failed".into()),
            ErrorKind::InvalidAlgorithm => {
                AuthError::UnsupportedAlgorithm("Algorithm does not match signing key".into())
            },
            ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingClaim(claim.clone()),
            _ => AuthError::InvalidTokenFormat(format!("JWT error: {}", err)),
        }
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;
