//! # AuthBridge Authentication
//!
//! JWT verification and signing key resolution for the AuthBridge processor.
//!
//! This crate provides:
//! - **JWT validation**: Claims parsing, signature verification, issuer and audience checks
//! - **Signing key cache**: JWKS-backed cache with single-flight refresh and optional TTL
//! - **Key set sources**: HTTP JWKS fetching and an in-memory source for tests
//! - **Algorithm validation**: Security checks for JWT algorithms
//!
//! ## Features
//!
//! - Only asymmetric algorithms (RSA, RSA-PSS, ECDSA, EdDSA) are supported
//! - Symmetric algorithms (HS256, etc.) and `none` are explicitly rejected
//! - Last-known-good keys keep serving when a TTL refresh fails
//!
//! ## Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use authbridge_authn::{
//!     SigningKeyCache, jwt::verify_with_signing_key_cache, key_source::HttpKeySetSource,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = HttpKeySetSource::new(
//!     reqwest::Client::new(),
//!     "http://keycloak:8080/realms/demo/protocol/openid-connect/certs",
//!     Duration::from_secs(5),
//! );
//! let cache = SigningKeyCache::new(Arc::new(source));
//!
//! let token = "eyJhbGciOiJSUzI1NiIsImtpZCI6InJzYS0yMDI0LTAxIn0...";
//! let claims = verify_with_signing_key_cache(token, &cache).await?;
//! claims.check_issuer("http://keycloak:8080/realms/demo")?;
//!
//! println!("Verified subject: {}", claims.sub.unwrap_or_default());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Authentication error types.
pub mod error;
/// JWT validation and claims.
pub mod jwt;
/// Key set sources.
pub mod key_source;
/// JWKS-backed signing key cache.
pub mod signing_key_cache;
/// Test utilities for authentication (feature-gated).
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
/// Algorithm validation.
pub mod validation;

// Re-export key types for convenience
pub use error::{AuthError, Result};
pub use jwt::{Audience, JwtClaims};
pub use key_source::{HttpKeySetSource, KeySet, KeySetSource, MemoryKeySetSource};
pub use signing_key_cache::SigningKeyCache;
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
