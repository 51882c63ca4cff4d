//! Shared test utilities for authentication testing.
//!
//! This module provides helpers for generating Ed25519 key pairs, publishing
//! them as JWKs, signing JWTs with them, and crafting raw JWT strings for
//! attack testing. It is feature-gated behind `testutil` to prevent leaking
//! into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! authbridge-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use authbridge_authn::testutil::TestKeyPair;
//!
//! let key = TestKeyPair::generate("kid-1");
//! let token = key.sign_token("https://idp.example/realms/demo", Some("orders"));
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand_core::OsRng;
use serde_json::json;
use zeroize::Zeroizing;

/// Fixed 2048-bit RSA modulus. Only the parse path is exercised with it; no
/// token is ever signed by the matching private key.
const TEST_RSA_MODULUS: &str = "7AD8qrhICg7Qc2OkPTmDs-IfeSH_bRT3d_-zN0yg3jEjl5O0RQ7arjN5KSEBK-hQD9nbSH-Q5BjknH32YZ3mgKnv5oxDsWty3SwlgNT4O_N4tYb6IInFKZxAG4jyRUQOWZpM_AjS1Cxzn42kDe3LzUpwCIXZ-JL5ZQCS2puLxx99o4q0AHhfLFzNMfGTKeg7Tur0tiAb7VErxWyCC7n-gs0wcP79qAl6-HDF5uIpj7lkQl6IxctXynGKRL2xbAjQwXxUHCAsb2Bo6ZiXGsGByRVUgYTWuY8HR6BGtRDp3iijR63GaiApIeTRVE5BA0uGMIvXd19k9J5ypcmKQXq0pw";

/// An Ed25519 signing key pair bound to a key id.
pub struct TestKeyPair {
    kid: String,
    pkcs8_der: Zeroizing<Vec<u8>>,
    public_key_b64: String,
}

impl TestKeyPair {
    /// Generates a fresh random key pair for `kid`.
    #[must_use]
    pub fn generate(kid: &str) -> Self {
        let (pkcs8_der, public_key_b64) = generate_test_keypair();
        Self { kid: kid.to_owned(), pkcs8_der, public_key_b64 }
    }

    /// Key id placed in the JWK and in signed token headers.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Public half as a JWK object, as an identity provider would publish it.
    #[must_use]
    pub fn jwk(&self) -> serde_json::Value {
        json!({
            "kid": self.kid,
            "kty": "OKP",
            "crv": "Ed25519",
            "alg": "EdDSA",
            "use": "sig",
            "x": self.public_key_b64,
        })
    }

    /// Signs arbitrary claims with this key.
    ///
    /// # Panics
    ///
    /// Panics if JWT encoding fails (should not happen with valid inputs).
    #[must_use]
    pub fn sign(&self, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.kid.clone());
        let encoding_key = EncodingKey::from_ed_der(&self.pkcs8_der);
        #[allow(clippy::expect_used)]
        jsonwebtoken::encode(&header, claims, &encoding_key).expect("Failed to encode test JWT")
    }

    /// Signs a token with standard claims for `issuer`, valid for one hour.
    ///
    /// `audience` becomes a single-string `aud` claim when present.
    #[must_use]
    pub fn sign_token(&self, issuer: &str, audience: Option<&str>) -> String {
        let mut claims = standard_claims(issuer);
        if let Some(audience) = audience {
            claims["aud"] = json!(audience);
        }
        self.sign(&claims)
    }
}

/// Standard claims for a token issued now and expiring in one hour.
#[must_use]
pub fn standard_claims(issuer: &str) -> serde_json::Value {
    let now = Utc::now().timestamp();
    json!({
        "iss": issuer,
        "sub": "spiffe://cluster.local/ns/team1/sa/caller",
        "azp": "caller-agent",
        "exp": now + 3600,
        "iat": now,
        "scope": "openid profile",
    })
}

/// Generates a test Ed25519 key pair.
///
/// Returns `(pkcs8_der, public_key_base64url)` where `pkcs8_der` is suitable
/// for [`EncodingKey::from_ed_der`] and the public key is the raw 32 bytes,
/// base64url without padding (the JWK `x` parameter).
pub fn generate_test_keypair() -> (Zeroizing<Vec<u8>>, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key_bytes = signing_key.verifying_key().to_bytes();
    let public_key_b64 = URL_SAFE_NO_PAD.encode(public_key_bytes);

    let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
    let mut pkcs8_der = Zeroizing::new(vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER version 0
        0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
        0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
        0x04, 0x22, // OCTET STRING, 34 bytes
        0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
    ]);
    pkcs8_der.extend_from_slice(&*private_bytes);

    (pkcs8_der, public_key_b64)
}

/// An RSA signature JWK with a fixed modulus, for key set parsing tests.
#[must_use]
pub fn rsa_test_jwk(kid: &str) -> serde_json::Value {
    json!({
        "kid": kid,
        "kty": "RSA",
        "alg": "RS256",
        "use": "sig",
        "n": TEST_RSA_MODULUS,
        "e": "AQAB",
    })
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The resulting JWT has the structure `{header_b64}.{payload_b64}.` with an
/// empty signature, for testing rejection of malformed or attack JWTs.
///
/// # Panics
///
/// Panics if JSON serialization fails.
#[must_use]
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    #[allow(clippy::expect_used)]
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    #[allow(clippy::expect_used)]
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Asserts that a [`Result<T, AuthError>`] is an `Err` matching the given
/// [`AuthError`] variant.
///
/// [`AuthError`]: crate::error::AuthError
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use authbridge_authn::assert_auth_error;
/// use authbridge_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::TokenExpired);
/// assert_auth_error!(result, TokenExpired);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_test_keypair_produces_valid_key() {
        let (pkcs8_der, public_key_b64) = generate_test_keypair();
        // PKCS#8 DER for Ed25519 is 48 bytes (16 header + 32 key)
        assert_eq!(pkcs8_der.len(), 48);
        // Base64url of 32 bytes = 43 characters (no padding)
        assert_eq!(public_key_b64.len(), 43);
    }

    #[test]
    fn test_jwk_carries_kid_and_curve() {
        let key = TestKeyPair::generate("kid-001");
        let jwk = key.jwk();
        assert_eq!(jwk["kid"], "kid-001");
        assert_eq!(jwk["crv"], "Ed25519");
    }

    #[test]
    fn test_sign_token_produces_three_part_token() {
        let key = TestKeyPair::generate("kid-001");
        let jwt = key.sign_token("https://idp.example", Some("svc"));
        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3, "JWT should have header.payload.signature");
        assert!(!parts[2].is_empty(), "signature should not be empty");
    }

    #[test]
    fn test_craft_raw_jwt_format() {
        let header = json!({"alg": "none", "typ": "JWT"});
        let payload = json!({"sub": "test"});
        let jwt = craft_raw_jwt(&header, &payload);
        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[2].is_empty(), "signature should be empty for raw JWTs");
    }

    #[test]
    fn test_assert_auth_error_macro() {
        use crate::error::AuthError;
        let result: Result<(), AuthError> = Err(AuthError::TokenExpired);
        assert_auth_error!(result, TokenExpired);
        let result: Result<(), AuthError> = Err(AuthError::key_not_found("kid-001"));
        assert_auth_error!(result, KeyNotFound, "unknown kid");
    }
}
