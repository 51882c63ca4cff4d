//! Key set source bound to the credential store.
//!
//! The JWKS endpoint is derived from the current credentials on every fetch,
//! so a credential reload that changes the token endpoint (or the explicit
//! `JWKS_URL`) is picked up by the next key set refresh.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use authbridge_authn::{AuthError, KeySet, KeySetSource, key_source::fetch_jwks};

use crate::credentials::CredentialStore;

/// Fetches the JWKS published at the store's current signing-keys endpoint.
pub struct StoreKeySetSource {
    store: Arc<CredentialStore>,
    client: reqwest::Client,
    timeout: Duration,
}

impl StoreKeySetSource {
    /// Creates a source reading its endpoint from `store`.
    #[must_use]
    pub fn new(store: Arc<CredentialStore>, client: reqwest::Client, timeout: Duration) -> Self {
        Self { store, client, timeout }
    }
}

#[async_trait]
impl KeySetSource for StoreKeySetSource {
    async fn fetch_key_set(&self) -> Result<KeySet, AuthError> {
        let Some(url) = self.store.snapshot().signing_keys_endpoint() else {
            tracing::warn!("no signing keys endpoint: set TOKEN_URL or JWKS_URL");
            return Err(AuthError::KeySourceNotConfigured);
        };
        fetch_jwks(&self.client, &url, self.timeout).await
    }

    fn location(&self) -> String {
        self.store.snapshot().signing_keys_endpoint().unwrap_or_else(|| "<unconfigured>".to_owned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use authbridge_authn::testutil::TestKeyPair;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;
    use crate::credentials::Credentials;

    fn source_for(credentials: Credentials) -> (Arc<CredentialStore>, StoreKeySetSource) {
        let store = Arc::new(CredentialStore::new(credentials));
        let source =
            StoreKeySetSource::new(Arc::clone(&store), reqwest::Client::new(), Duration::from_secs(2));
        (store, source)
    }

    #[tokio::test]
    async fn test_fetches_from_derived_certs_endpoint() {
        let server = MockServer::start().await;
        let key = TestKeyPair::generate("kid-a");
        Mock::given(method("GET"))
            .and(path("/realms/demo/protocol/openid-connect/certs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": [key.jwk()]})))
            .expect(1)
            .mount(&server)
            .await;

        let (_store, source) = source_for(
            Credentials::builder()
                .client_secret("")
                .token_endpoint(format!(
                    "{}/realms/demo/protocol/openid-connect/token",
                    server.uri()
                ))
                .build(),
        );

        let key_set = source.fetch_key_set().await.unwrap();
        assert!(key_set.contains("kid-a"));
        assert!(source.location().ends_with("/openid-connect/certs"));
    }

    #[tokio::test]
    async fn test_follows_reloaded_endpoint() {
        let server = MockServer::start().await;
        let key = TestKeyPair::generate("kid-b");
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": [key.jwk()]})))
            .mount(&server)
            .await;

        let (store, source) = source_for(Credentials::builder().client_secret("").build());
        assert!(matches!(source.fetch_key_set().await, Err(AuthError::KeySourceNotConfigured)));
        assert_eq!(source.location(), "<unconfigured>");

        store.replace(
            Credentials::builder().client_secret("").jwks_url(format!("{}/jwks", server.uri())).build(),
        );

        let key_set = source.fetch_key_set().await.unwrap();
        assert!(key_set.contains("kid-b"));
    }
}
