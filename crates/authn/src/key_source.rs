//! Key set sources for the signing key cache.
//!
//! A [`KeySetSource`] produces the complete set of verification keys
//! published by an identity provider. The [`SigningKeyCache`] calls it on a
//! cache miss; sources never cache on their own.
//!
//! ```text
//! SigningKeyCache ──miss──► KeySetSource::fetch_key_set
//!                             ├── HttpKeySetSource   (JWKS over HTTP, production)
//!                             └── MemoryKeySetSource (fixed JWKs, tests)
//! ```
//!
//! [`SigningKeyCache`]: crate::signing_key_cache::SigningKeyCache

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::{PUBLIC_KEY_LENGTH, VerifyingKey};
use jsonwebtoken::{
    DecodingKey,
    jwk::{AlgorithmParameters, EllipticCurve, Jwk, PublicKeyUse},
};
use parking_lot::RwLock;
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::error::AuthError;

/// A parsed key set: key id → verification key.
#[derive(Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, Arc<DecodingKey>>,
}

impl KeySet {
    /// Parses a JWKS document (`{"keys": [...]}`).
    ///
    /// Individual keys that cannot be used for signature verification are
    /// skipped: keys without a `kid`, encryption keys (`"use": "enc"`),
    /// symmetric keys and keys that fail to parse.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKeySet`] if the document is not a JWKS or
    /// no key in it is usable.
    pub fn from_jwks_json(body: &[u8]) -> Result<Self, AuthError> {
        #[derive(Deserialize)]
        struct RawKeySet {
            keys: Vec<serde_json::Value>,
        }

        let raw: RawKeySet = serde_json::from_slice(body)
            .map_err(|e| AuthError::invalid_key_set(format!("malformed JWKS document: {e}")))?;

        let total = raw.keys.len();
        let mut keys = HashMap::with_capacity(total);
        for value in raw.keys {
            let jwk: Jwk = match serde_json::from_value(value) {
                Ok(jwk) => jwk,
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unparseable JWK");
                    continue;
                },
            };
            match decoding_key_from_jwk(&jwk) {
                Ok(Some((kid, key))) => {
                    keys.insert(kid, Arc::new(key));
                },
                Ok(None) => {},
                Err(err) => {
                    tracing::debug!(kid = ?jwk.common.key_id, error = %err, "skipping invalid JWK");
                },
            }
        }

        if keys.is_empty() {
            return Err(AuthError::invalid_key_set(format!(
                "no usable signing keys among {total} published keys"
            )));
        }

        Ok(Self { keys })
    }

    /// Returns the verification key for `kid`, if present.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<Arc<DecodingKey>> {
        self.keys.get(kid).cloned()
    }

    /// Returns whether the set holds `kid`.
    #[must_use]
    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    /// Number of usable keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the set holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key ids in the set, in no particular order.
    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySet").field("kids", &self.keys.keys().collect::<Vec<_>>()).finish()
    }
}

/// Converts a JWK into a `(kid, DecodingKey)` pair.
///
/// Returns `Ok(None)` for keys that are well-formed but not meant for
/// signature verification.
fn decoding_key_from_jwk(jwk: &Jwk) -> Result<Option<(String, DecodingKey)>, AuthError> {
    let Some(kid) = jwk.common.key_id.clone() else {
        tracing::debug!("skipping JWK without kid");
        return Ok(None);
    };

    if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
        tracing::debug!(kid, "skipping encryption JWK");
        return Ok(None);
    }

    match &jwk.algorithm {
        AlgorithmParameters::OctetKey(_) => {
            tracing::debug!(kid, "skipping symmetric JWK");
            return Ok(None);
        },
        AlgorithmParameters::OctetKeyPair(params) => {
            if !matches!(params.curve, EllipticCurve::Ed25519) {
                return Err(AuthError::invalid_public_key(format!(
                    "unsupported OKP curve {:?}",
                    params.curve
                )));
            }
            check_ed25519_point(&params.x)?;
        },
        AlgorithmParameters::RSA(_) | AlgorithmParameters::EllipticCurve(_) => {},
    }

    let key = DecodingKey::from_jwk(jwk).map_err(|e| AuthError::invalid_public_key(e.to_string()))?;
    Ok(Some((kid, key)))
}

/// Checks that a base64url Ed25519 public key is 32 bytes and a valid point.
fn check_ed25519_point(x: &str) -> Result<(), AuthError> {
    let public_key_bytes: Zeroizing<Vec<u8>> = Zeroizing::new(
        URL_SAFE_NO_PAD
            .decode(x.as_bytes())
            .map_err(|e| AuthError::invalid_public_key(format!("base64 decode: {e}")))?,
    );

    let key_bytes: [u8; PUBLIC_KEY_LENGTH] =
        public_key_bytes.as_slice().try_into().map_err(|_| {
            AuthError::invalid_public_key(format!(
                "expected {PUBLIC_KEY_LENGTH} bytes, got {}",
                public_key_bytes.len()
            ))
        })?;

    VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| AuthError::invalid_public_key(format!("invalid Ed25519 key: {e}")))?;
    Ok(())
}

/// Source of verification key sets.
///
/// Implementations fetch the *complete* current key set on every call; the
/// signing key cache decides when to call.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    /// Fetches the current key set.
    ///
    /// # Errors
    ///
    /// - [`AuthError::KeySetFetch`] when the endpoint is unreachable, slow or answers non-2xx
    /// - [`AuthError::InvalidKeySet`] when the document is malformed or holds no usable keys
    /// - [`AuthError::KeySourceNotConfigured`] when there is nothing to fetch from
    async fn fetch_key_set(&self) -> Result<KeySet, AuthError>;

    /// Human-readable location of the key set, used in logs.
    fn location(&self) -> String;
}

/// Fetches a JWKS document over HTTP and parses it.
///
/// # Errors
///
/// See [`KeySetSource::fetch_key_set`].
#[tracing::instrument(skip(client))]
pub async fn fetch_jwks(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<KeySet, AuthError> {
    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| AuthError::key_set_fetch(url, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::key_set_fetch(url, format!("unexpected status {status}")));
    }

    let body = response.bytes().await.map_err(|e| AuthError::key_set_fetch(url, e.to_string()))?;
    let key_set = KeySet::from_jwks_json(&body)?;

    tracing::debug!(keys = key_set.len(), "fetched JWKS");
    Ok(key_set)
}

/// JWKS endpoint fetched with a shared `reqwest` client.
pub struct HttpKeySetSource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpKeySetSource {
    /// Creates a source for `url` with the given per-request timeout.
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self { client, url: url.into(), timeout }
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch_key_set(&self) -> Result<KeySet, AuthError> {
        fetch_jwks(&self.client, &self.url, self.timeout).await
    }

    fn location(&self) -> String {
        self.url.clone()
    }
}

/// In-memory key set source.
///
/// Serves a fixed list of JWKs and counts fetches. Latency and outages can be
/// injected, which makes it the reference source for cache tests.
#[derive(Default)]
pub struct MemoryKeySetSource {
    keys: RwLock<Vec<serde_json::Value>>,
    fetch_count: AtomicU64,
    delay: RwLock<Option<Duration>>,
    unavailable: AtomicBool,
}

impl MemoryKeySetSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source serving `keys` (JWK JSON objects).
    #[must_use]
    pub fn with_keys(keys: impl IntoIterator<Item = serde_json::Value>) -> Self {
        let source = Self::new();
        *source.keys.write() = keys.into_iter().collect();
        source
    }

    /// Publishes an additional JWK.
    pub fn add_key(&self, jwk: serde_json::Value) {
        self.keys.write().push(jwk);
    }

    /// Withdraws every JWK whose `kid` equals `kid`.
    pub fn remove_key(&self, kid: &str) {
        self.keys.write().retain(|jwk| jwk.get("kid").and_then(|v| v.as_str()) != Some(kid));
    }

    /// Delays every subsequent fetch by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write() = delay;
    }

    /// Makes subsequent fetches fail with a transient error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of fetches started so far.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySetSource for MemoryKeySetSource {
    async fn fetch_key_set(&self) -> Result<KeySet, AuthError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthError::key_set_fetch(self.location(), "source unavailable"));
        }

        let document = serde_json::json!({ "keys": *self.keys.read() });
        let body = serde_json::to_vec(&document)
            .map_err(|e| AuthError::invalid_key_set(e.to_string()))?;
        KeySet::from_jwks_json(&body)
    }

    fn location(&self) -> String {
        "memory".to_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;
    use crate::testutil::{TestKeyPair, rsa_test_jwk};

    #[test]
    fn test_parse_mixed_key_set() {
        let signing = TestKeyPair::generate("ed-1");
        let body = serde_json::to_vec(&json!({
            "keys": [
                signing.jwk(),
                rsa_test_jwk("rsa-1"),
                // encryption key published alongside signing keys
                { "kid": "enc-1", "kty": "RSA", "use": "enc", "alg": "RSA-OAEP",
                  "n": rsa_test_jwk("x")["n"], "e": "AQAB" },
                // symmetric key
                { "kid": "oct-1", "kty": "oct", "k": "c2VjcmV0" },
                // no kid
                { "kty": "RSA", "n": rsa_test_jwk("x")["n"], "e": "AQAB" },
                // garbage
                { "kid": "junk", "kty": "nope" }
            ]
        }))
        .unwrap();

        let set = KeySet::from_jwks_json(&body).unwrap();

        assert_eq!(set.len(), 2);
        assert!(set.contains("ed-1"));
        assert!(set.contains("rsa-1"));
        assert!(!set.contains("enc-1"));
        assert!(!set.contains("oct-1"));
    }

    #[test]
    fn test_parse_rejects_invalid_ed25519_point() {
        let body = serde_json::to_vec(&json!({
            "keys": [{ "kid": "short", "kty": "OKP", "crv": "Ed25519", "x": "AAAA" }]
        }))
        .unwrap();

        let result = KeySet::from_jwks_json(&body);

        assert!(matches!(result, Err(AuthError::InvalidKeySet(_))));
    }

    #[test]
    fn test_parse_malformed_document() {
        assert!(matches!(
            KeySet::from_jwks_json(b"not json"),
            Err(AuthError::InvalidKeySet(ref msg)) if msg.contains("malformed")
        ));
        assert!(matches!(
            KeySet::from_jwks_json(br#"{"keys": []}"#),
            Err(AuthError::InvalidKeySet(ref msg)) if msg.contains("no usable")
        ));
    }

    #[tokio::test]
    async fn test_http_source_fetches_jwks() {
        let server = MockServer::start().await;
        let signing = TestKeyPair::generate("kc-1");
        Mock::given(method("GET"))
            .and(path("/realms/demo/protocol/openid-connect/certs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [signing.jwk()] })))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/realms/demo/protocol/openid-connect/certs", server.uri());
        let source = HttpKeySetSource::new(reqwest::Client::new(), url.clone(), Duration::from_secs(2));

        let set = source.fetch_key_set().await.unwrap();

        assert!(set.contains("kc-1"));
        assert_eq!(source.location(), url);
    }

    #[tokio::test]
    async fn test_http_source_non_success_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source =
            HttpKeySetSource::new(reqwest::Client::new(), server.uri(), Duration::from_secs(2));
        let err = source.fetch_key_set().await.unwrap_err();

        assert!(err.is_transient(), "expected transient error, got {err:?}");
    }

    #[tokio::test]
    async fn test_http_source_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "keys": [] }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let source =
            HttpKeySetSource::new(reqwest::Client::new(), server.uri(), Duration::from_millis(50));
        let err = source.fetch_key_set().await.unwrap_err();

        assert!(matches!(err, AuthError::KeySetFetch { .. }));
    }

    #[tokio::test]
    async fn test_memory_source_counts_and_fails_on_demand() {
        let signing = TestKeyPair::generate("mem-1");
        let source = MemoryKeySetSource::with_keys([signing.jwk()]);

        assert!(source.fetch_key_set().await.unwrap().contains("mem-1"));
        source.set_unavailable(true);
        assert!(source.fetch_key_set().await.unwrap_err().is_transient());
        source.set_unavailable(false);
        source.remove_key("mem-1");
        assert!(matches!(source.fetch_key_set().await, Err(AuthError::InvalidKeySet(_))));

        assert_eq!(source.fetch_count(), 3);
    }
}
