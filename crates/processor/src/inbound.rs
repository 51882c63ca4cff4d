//! Inbound request validation.
//!
//! Every request arriving for the workload must carry a bearer token signed
//! by a key in the identity provider's JWKS, issued by the configured issuer
//! and, when configured, addressed to the expected audience.

use std::sync::Arc;

use authbridge_authn::{AuthError, JwtClaims, SigningKeyCache, jwt::verify_with_signing_key_cache};

use crate::credentials::CredentialStore;

/// Reason given when no credential was presented.
pub const MISSING_AUTHORIZATION: &str = "missing Authorization header";
/// Reason given when the token was issued by someone else.
pub const ISSUER_MISMATCH: &str = "issuer mismatch";
/// Reason given when the token is not addressed to this workload.
pub const AUDIENCE_MISMATCH: &str = "audience mismatch";

/// Outcome of inbound validation.
#[derive(Debug)]
pub enum InboundDecision {
    /// Forward the request; the claims are those of the verified token.
    Accepted(Box<JwtClaims>),
    /// Answer 401 with this reason; do not forward.
    Rejected(String),
}

impl InboundDecision {
    fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
///
/// The scheme is matched case-insensitively. Returns `None` for any other
/// scheme or an empty token.
#[must_use]
pub fn bearer_token(authorization: &str) -> Option<&str> {
    let (scheme, token) = authorization.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Validates inbound bearer tokens.
#[derive(bon::Builder)]
pub struct InboundValidator {
    store: Arc<CredentialStore>,
    key_cache: Arc<SigningKeyCache>,
}

impl InboundValidator {
    /// Validates the request's `Authorization` header value.
    pub async fn validate(&self, authorization: Option<&str>) -> InboundDecision {
        let Some(authorization) = authorization.filter(|value| !value.trim().is_empty()) else {
            tracing::debug!("rejecting request without Authorization header");
            return InboundDecision::rejected(MISSING_AUTHORIZATION);
        };

        let Some(token) = bearer_token(authorization) else {
            return InboundDecision::rejected(format!(
                "token validation failed: {}",
                AuthError::invalid_token_format("Authorization header is not a Bearer token")
            ));
        };

        let claims = match verify_with_signing_key_cache(token, &self.key_cache).await {
            Ok(claims) => claims,
            Err(err) => {
                tracing::info!(error = %err, "inbound token rejected");
                return InboundDecision::rejected(format!("token validation failed: {err}"));
            },
        };

        // One snapshot for both checks.
        let credentials = self.store.snapshot();

        if let Err(err) = claims.check_issuer(&credentials.issuer) {
            tracing::info!(error = %err, "inbound token rejected");
            return InboundDecision::rejected(ISSUER_MISMATCH);
        }

        if let Err(err) = claims.check_audience(credentials.expected_audience.as_deref()) {
            tracing::info!(error = %err, "inbound token rejected");
            return InboundDecision::rejected(AUDIENCE_MISMATCH);
        }

        tracing::debug!(
            sub = claims.sub.as_deref().unwrap_or_default(),
            iss = %claims.iss,
            azp = claims.azp.as_deref().unwrap_or_default(),
            "inbound token accepted"
        );
        InboundDecision::Accepted(Box::new(claims))
    }
}
