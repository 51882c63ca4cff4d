//! JWT validation and claims.
//!
//! This module provides types and functions for decoding and validating the
//! bearer tokens that arrive on inbound requests.
//!
//! Verification is split in two: [`verify_with_signing_key_cache`] checks the
//! header policy, resolves the key and verifies signature and expiry, and the
//! caller then applies the deployment's issuer and audience policy with
//! [`JwtClaims::check_issuer`] and [`JwtClaims::check_audience`].
//!
//! # Example
//!
//! ```no_run
//! use authbridge_authn::{SigningKeyCache, jwt::verify_with_signing_key_cache};
//!
//! # async fn example(token: &str, cache: &SigningKeyCache) -> Result<(), authbridge_authn::AuthError> {
//! let claims = verify_with_signing_key_cache(token, cache).await?;
//! claims.check_issuer("http://keycloak:8080/realms/demo")?;
//! claims.check_audience(Some("orders"))?;
//!
//! println!("Subject: {}", claims.sub.unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};

use crate::{
    error::AuthError,
    signing_key_cache::SigningKeyCache,
    validation::{validate_algorithm, validate_kid},
};

/// The `aud` claim: a single audience or a list of them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// `"aud": "orders"`
    One(String),
    /// `"aud": ["orders", "account"]`
    Many(Vec<String>),
}

impl Audience {
    /// Returns `true` if `audience` is (one of) the token's audiences.
    #[must_use]
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Self::One(value) => value == audience,
            Self::Many(values) => values.iter().any(|value| value == audience),
        }
    }
}

/// Claims read from a verified access token.
///
/// Identity providers in this deployment issue tokens shaped like:
///
/// ```json
/// {
///   "iss": "http://keycloak:8080/realms/demo",
///   "sub": "spiffe://cluster.local/ns/team1/sa/caller",
///   "aud": ["orders", "account"],
///   "azp": "caller-agent",
///   "exp": 1234567890,
///   "iat": 1234567800,
///   "scope": "openid orders:read"
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Issuer. Empty when the token carries none, which never matches a configured issuer.
    #[serde(default)]
    pub iss: String,
    /// Subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Audience(s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    /// Expiration time (seconds since epoch).
    ///
    /// Defaulted so that a token without `exp` surfaces as a missing claim
    /// from validation rather than as a decoding error.
    #[serde(default)]
    pub exp: u64,
    /// Issued at (seconds since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Not before (seconds since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    /// JWT ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Space-separated scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Authorized party (the client the token was issued to).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,
}

impl JwtClaims {
    /// Parse scopes from the space-separated `scope` claim.
    #[must_use]
    pub fn parse_scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .map(|scope| scope.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// Checks that the token was issued by `expected`.
    ///
    /// An empty `expected` issuer never matches: a deployment without a
    /// configured issuer rejects every token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidIssuer`] on mismatch.
    pub fn check_issuer(&self, expected: &str) -> Result<(), AuthError> {
        if expected.is_empty() {
            return Err(AuthError::invalid_issuer("no issuer configured"));
        }
        if self.iss != expected {
            return Err(AuthError::invalid_issuer(format!(
                "expected '{}', got '{}'",
                expected, self.iss
            )));
        }
        Ok(())
    }

    /// Checks that `expected` is among the token's audiences.
    ///
    /// `None` (or an empty string) skips the check.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidAudience`] when the audience is required
    /// and absent.
    pub fn check_audience(&self, expected: Option<&str>) -> Result<(), AuthError> {
        let Some(expected) = expected.filter(|aud| !aud.is_empty()) else {
            return Ok(());
        };
        match &self.aud {
            Some(aud) if aud.contains(expected) => Ok(()),
            Some(aud) => {
                Err(AuthError::invalid_audience(format!("expected '{}', got {:?}", expected, aud)))
            },
            None => Err(AuthError::invalid_audience(format!(
                "expected '{}', token has no audience",
                expected
            ))),
        }
    }
}

/// Decode JWT header without verification.
///
/// # Errors
///
/// Returns an error if the JWT header cannot be decoded.
pub fn decode_jwt_header(token: &str) -> Result<Header, AuthError> {
    decode_header(token)
        .map_err(|e| AuthError::invalid_token_format(format!("Failed to decode JWT header: {}", e)))
}

/// Verify JWT signature and expiry with a public key.
///
/// Audience and issuer are not checked here; see
/// [`JwtClaims::check_issuer`] and [`JwtClaims::check_audience`].
///
/// # Errors
///
/// Returns an error if signature verification fails, the token has expired,
/// or it lacks an `exp` claim.
pub fn verify_signature(
    token: &str,
    key: &DecodingKey,
    algorithm: Algorithm,
) -> Result<JwtClaims, AuthError> {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.validate_aud = false;

    let token_data = decode::<JwtClaims>(token, key, &validation)?;

    Ok(token_data.claims)
}

/// Verify a JWT against the keys held by a signing key cache.
///
/// 1. Decodes the header and requires a well-formed `kid`
/// 2. Checks the algorithm against [`crate::validation::ACCEPTED_ALGORITHMS`]
/// 3. Resolves the key by `kid` (refreshing the key set once on a miss)
/// 4. Verifies signature, `exp` and `nbf`
///
/// # Errors
///
/// Returns an error if:
/// - The JWT is malformed or its header has no `kid`
/// - The algorithm is forbidden or unknown
/// - No key with that `kid` is published, or the key set cannot be fetched
/// - The signature is invalid or the token is expired
#[tracing::instrument(skip(token, signing_key_cache))]
pub async fn verify_with_signing_key_cache(
    token: &str,
    signing_key_cache: &SigningKeyCache,
) -> Result<JwtClaims, AuthError> {
    let header = decode_jwt_header(token)?;

    let kid = header
        .kid
        .ok_or_else(|| AuthError::invalid_token_format("JWT header missing 'kid' field"))?;

    // Validate kid format before any cache or network interaction
    validate_kid(&kid)?;

    let alg_str = format!("{:?}", header.alg);
    validate_algorithm(&alg_str)?;

    let decoding_key = signing_key_cache.get_decoding_key(&kid).await.inspect_err(|e| {
        tracing::warn!(kid = %kid, error = %e, "Failed to resolve signing key");
    })?;

    let claims = verify_signature(token, &decoding_key, header.alg)?;

    tracing::debug!(kid = %kid, alg = %alg_str, "JWT signature verified");

    Ok(claims)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::{
        assert_auth_error,
        key_source::{KeySetSource, MemoryKeySetSource},
        testutil::{TestKeyPair, craft_raw_jwt, standard_claims},
    };

    const ISSUER: &str = "http://keycloak:8080/realms/demo";

    fn cache_for(keys: &[&TestKeyPair]) -> SigningKeyCache {
        let source = MemoryKeySetSource::with_keys(keys.iter().map(|k| k.jwk()));
        SigningKeyCache::new(Arc::new(source) as Arc<dyn KeySetSource>)
    }

    fn claims_with_aud(aud: serde_json::Value) -> JwtClaims {
        let mut claims = standard_claims(ISSUER);
        claims["aud"] = aud;
        serde_json::from_value(claims).unwrap()
    }

    #[tokio::test]
    async fn test_verify_valid_token() {
        let key = TestKeyPair::generate("kid-a");
        let cache = cache_for(&[&key]);
        let token = key.sign_token(ISSUER, Some("orders"));

        let claims = verify_with_signing_key_cache(&token, &cache).await.unwrap();

        assert_eq!(claims.iss, ISSUER);
        assert_eq!(claims.sub.as_deref(), Some("spiffe://cluster.local/ns/team1/sa/caller"));
        assert_eq!(claims.aud, Some(Audience::One("orders".into())));
        assert_eq!(claims.parse_scopes(), vec!["openid", "profile"]);
    }

    #[tokio::test]
    async fn test_verify_rejects_signature_from_other_key() {
        let published = TestKeyPair::generate("kid-a");
        let impostor = TestKeyPair::generate("kid-a");
        let cache = cache_for(&[&published]);
        let token = impostor.sign_token(ISSUER, None);

        let result = verify_with_signing_key_cache(&token, &cache).await;
        assert_auth_error!(result, InvalidSignature);
    }

    #[tokio::test]
    async fn test_verify_rejects_expired_token() {
        let key = TestKeyPair::generate("kid-a");
        let cache = cache_for(&[&key]);
        let now = Utc::now().timestamp();
        let mut claims = standard_claims(ISSUER);
        claims["iat"] = json!(now - 7200);
        claims["exp"] = json!(now - 3600);

        let result = verify_with_signing_key_cache(&key.sign(&claims), &cache).await;
        assert_auth_error!(result, TokenExpired);
    }

    #[tokio::test]
    async fn test_verify_requires_exp() {
        let key = TestKeyPair::generate("kid-a");
        let cache = cache_for(&[&key]);
        let mut claims = standard_claims(ISSUER);
        claims.as_object_mut().unwrap().remove("exp");

        let result = verify_with_signing_key_cache(&key.sign(&claims), &cache).await;
        assert_auth_error!(result, MissingClaim);
    }

    #[tokio::test]
    async fn test_verify_unknown_kid() {
        let key = TestKeyPair::generate("kid-a");
        let stranger = TestKeyPair::generate("kid-b");
        let cache = cache_for(&[&key]);

        let result =
            verify_with_signing_key_cache(&stranger.sign_token(ISSUER, None), &cache).await;
        assert_auth_error!(result, KeyNotFound);
    }

    #[tokio::test]
    async fn test_verify_requires_kid() {
        let cache = cache_for(&[]);
        let token = craft_raw_jwt(&json!({"alg": "EdDSA", "typ": "JWT"}), &standard_claims(ISSUER));

        let result = verify_with_signing_key_cache(&token, &cache).await;
        assert_auth_error!(result, InvalidTokenFormat);
    }

    #[rstest]
    #[case("HS256")]
    #[case("HS512")]
    #[tokio::test]
    async fn test_verify_rejects_symmetric_algorithms(#[case] alg: &str) {
        let cache = cache_for(&[]);
        let token = craft_raw_jwt(
            &json!({"alg": alg, "typ": "JWT", "kid": "kid-a"}),
            &standard_claims(ISSUER),
        );

        let result = verify_with_signing_key_cache(&token, &cache).await;
        assert_auth_error!(result, UnsupportedAlgorithm);
    }

    #[tokio::test]
    async fn test_verify_garbage_token() {
        let cache = cache_for(&[]);
        let result = verify_with_signing_key_cache("not-a-jwt", &cache).await;
        assert_auth_error!(result, InvalidTokenFormat);
    }

    #[test]
    fn test_check_issuer() {
        let claims = claims_with_aud(json!("orders"));
        assert!(claims.check_issuer(ISSUER).is_ok());
        assert_auth_error!(claims.check_issuer("http://other/realms/x"), InvalidIssuer);
        assert_auth_error!(claims.check_issuer(""), InvalidIssuer, "unconfigured issuer fails closed");
    }

    #[test]
    fn test_missing_iss_never_matches() {
        let mut raw = standard_claims(ISSUER);
        raw.as_object_mut().unwrap().remove("iss");
        let claims: JwtClaims = serde_json::from_value(raw).unwrap();

        assert_eq!(claims.iss, "");
        assert_auth_error!(claims.check_issuer(ISSUER), InvalidIssuer);
    }

    #[rstest]
    #[case(json!("orders"), Some("orders"), true)]
    #[case(json!(["account", "orders"]), Some("orders"), true)]
    #[case(json!("account"), Some("orders"), false)]
    #[case(json!(["account"]), Some("orders"), false)]
    #[case(json!("account"), None, true)]
    #[case(json!("account"), Some(""), true)]
    fn test_check_audience(
        #[case] aud: serde_json::Value,
        #[case] expected: Option<&str>,
        #[case] accepted: bool,
    ) {
        let claims = claims_with_aud(aud);
        assert_eq!(claims.check_audience(expected).is_ok(), accepted);
    }

    #[test]
    fn test_check_audience_without_aud_claim() {
        let claims: JwtClaims = serde_json::from_value(standard_claims(ISSUER)).unwrap();
        assert!(claims.aud.is_none());
        assert!(claims.check_audience(None).is_ok());
        assert_auth_error!(claims.check_audience(Some("orders")), InvalidAudience);
    }
}
