//! Credential store.
//!
//! The [`CredentialStore`] holds the processor's authentication material as
//! one immutable [`Credentials`] snapshot. Request handlers take a snapshot
//! once per session; a reload publishes a complete replacement, so a session
//! never observes a mix of old and new values.

use std::sync::Arc;

use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::error::{ProcessorError, Result};

/// Authentication material for one processor instance.
///
/// # Examples
///
/// ```
/// use authbridge_processor::credentials::Credentials;
///
/// let credentials = Credentials::builder()
///     .client_id("orders-agent")
///     .client_secret("s3cret")
///     .token_endpoint("http://keycloak:8080/realms/demo/protocol/openid-connect/token")
///     .issuer("http://keycloak:8080/realms/demo")
///     .target_audience("inventory")
///     .target_scopes(vec!["inventory:read".to_owned()])
///     .build();
///
/// assert!(credentials.is_exchange_ready());
/// assert_eq!(
///     credentials.signing_keys_endpoint().as_deref(),
///     Some("http://keycloak:8080/realms/demo/protocol/openid-connect/certs"),
/// );
/// ```
#[derive(Debug, Clone, bon::Builder)]
pub struct Credentials {
    /// OAuth client id of this workload.
    #[builder(into, default)]
    pub client_id: String,

    /// OAuth client secret of this workload.
    #[builder(with = |secret: impl Into<String>| SecretString::from(secret.into()))]
    pub client_secret: SecretString,

    /// Token endpoint used for token exchange.
    #[builder(into, default)]
    pub token_endpoint: String,

    /// Issuer that inbound tokens must carry.
    #[builder(into, default)]
    pub issuer: String,

    /// Audience that inbound tokens must carry, if enforced.
    #[builder(into)]
    pub expected_audience: Option<String>,

    /// Audience requested for outbound exchanged tokens.
    #[builder(into, default)]
    pub target_audience: String,

    /// Scopes requested for outbound exchanged tokens, in order.
    #[builder(default)]
    pub target_scopes: Vec<String>,

    /// Explicit JWKS endpoint overriding the one derived from the token endpoint.
    #[builder(into)]
    pub jwks_url: Option<String>,
}

impl Credentials {
    /// Returns `true` when everything an outbound token exchange needs is set.
    #[must_use]
    pub fn is_exchange_ready(&self) -> bool {
        !self.client_id.is_empty()
            && !self.client_secret.expose_secret().is_empty()
            && !self.token_endpoint.is_empty()
    }

    /// Space-joined target scopes, as sent in the `scope` form field.
    #[must_use]
    pub fn scope_param(&self) -> String {
        self.target_scopes.join(" ")
    }

    /// JWKS endpoint: the explicit override, else derived from the token endpoint.
    ///
    /// Returns `None` when neither is usable.
    #[must_use]
    pub fn signing_keys_endpoint(&self) -> Option<String> {
        if let Some(url) = self.jwks_url.as_ref().filter(|url| !url.is_empty()) {
            return Some(url.clone());
        }
        if self.token_endpoint.is_empty() {
            return None;
        }
        match derive_signing_keys_endpoint(&self.token_endpoint) {
            Ok(url) => Some(url),
            Err(err) => {
                tracing::debug!(error = %err, "cannot derive signing keys endpoint");
                None
            },
        }
    }
}

/// Derives the JWKS endpoint from a token endpoint by replacing the final
/// path segment with `certs`.
///
/// `…/protocol/openid-connect/token` becomes `…/protocol/openid-connect/certs`.
/// Query and fragment are dropped.
///
/// # Errors
///
/// Returns [`ProcessorError::Config`] if `token_endpoint` is not an absolute
/// URL with a non-empty path.
pub fn derive_signing_keys_endpoint(token_endpoint: &str) -> Result<String> {
    let mut url = Url::parse(token_endpoint)
        .map_err(|e| ProcessorError::config(format!("invalid token endpoint: {e}")))?;

    if url.path().trim_matches('/').is_empty() {
        return Err(ProcessorError::config("token endpoint has no path to derive certs from"));
    }

    url.path_segments_mut()
        .map_err(|()| ProcessorError::config("token endpoint cannot carry a path"))?
        .pop_if_empty()
        .pop()
        .push("certs");
    url.set_query(None);
    url.set_fragment(None);

    Ok(url.into())
}

/// Concurrently readable holder of the current [`Credentials`].
#[derive(Debug)]
pub struct CredentialStore {
    current: RwLock<Arc<Credentials>>,
}

impl CredentialStore {
    /// Creates a store publishing `credentials`.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self { current: RwLock::new(Arc::new(credentials)) }
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Credentials> {
        Arc::clone(&self.current.read())
    }

    /// Atomically publishes `credentials` as the new snapshot.
    ///
    /// Snapshots already handed out stay valid and unchanged.
    pub fn replace(&self, credentials: Credentials) {
        *self.current.write() = Arc::new(credentials);
    }
}
