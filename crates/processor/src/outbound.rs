//! Outbound token exchange (RFC 8693).
//!
//! A workload calling another service presents its own token. Before the
//! request leaves the pod, the [`TokenExchanger`] trades that token at the
//! identity provider for one scoped to the receiving service
//! (`TARGET_AUDIENCE`, `TARGET_SCOPES`) and swaps the `Authorization` header.
//!
//! Exchange failures are never visible to the caller: the original header is
//! forwarded unchanged and the cause is logged with the target audience.
//!
//! Exchanged tokens are cached per (subject token, client, audience, scopes)
//! until shortly before they expire, bounded by a configurable maximum.
//! Concurrent identical exchanges share one request to the token endpoint.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use fail::fail_point;
use moka::{Expiry, future::Cache};
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::{
    credentials::{CredentialStore, Credentials},
    error::ProcessorError,
    inbound::bearer_token,
};

/// `grant_type` for token exchange.
pub const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

/// Token type of both the subject token and the requested token.
pub const TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Default timeout of one token endpoint request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default upper bound on how long an exchanged token is reused.
pub const DEFAULT_TOKEN_CACHE_MAX_TTL: Duration = Duration::from_secs(60);

/// Default number of exchanged tokens kept.
pub const DEFAULT_TOKEN_CACHE_CAPACITY: u64 = 10_000;

/// Exchanged tokens are dropped this long before the provider's expiry.
const EXPIRY_SKEW: Duration = Duration::from_secs(30);

/// Passthrough reason: client credentials or token endpoint missing.
pub const INCOMPLETE_CONFIG: &str = "incomplete config";
/// Passthrough reason: the request carries no bearer token.
pub const NO_TOKEN: &str = "no token";
/// Passthrough reason: the token endpoint call failed.
pub const EXCHANGE_FAILED: &str = "exchange failed";

/// How the processor authenticates itself to the token endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ClientAuthMethod {
    /// `client_id` and `client_secret` as form fields.
    #[default]
    ClientSecretPost,
    /// HTTP Basic authentication.
    ClientSecretBasic,
}

/// Outcome of outbound processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundDecision {
    /// Replace the `Authorization` header with this value.
    Exchanged {
        /// Complete header value, `Bearer <access_token>`.
        authorization: String,
    },
    /// Forward the original header unchanged, for the given reason.
    PassedThrough(&'static str),
}

/// A token issued by the token endpoint.
#[derive(Debug, Clone)]
pub struct ExchangedToken {
    /// The new access token.
    pub access_token: Arc<str>,
    /// Lifetime reported by the token endpoint.
    pub expires_in: Option<Duration>,
}

#[derive(Deserialize)]
struct TokenExchangeResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    issued_token_type: Option<String>,
}

#[derive(Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct ExchangeKey {
    subject_token: String,
    client_id: String,
    token_endpoint: String,
    audience: String,
    scope: String,
}

#[derive(Clone)]
struct CachedToken {
    token: ExchangedToken,
    ttl: Duration,
}

struct TokenLifetime;

impl Expiry<ExchangeKey, CachedToken> for TokenLifetime {
    fn expire_after_create(
        &self,
        _key: &ExchangeKey,
        value: &CachedToken,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Exchanges outbound bearer tokens at the configured token endpoint.
pub struct TokenExchanger {
    store: Arc<CredentialStore>,
    client: reqwest::Client,
    timeout: Duration,
    client_auth: ClientAuthMethod,
    cache_max_ttl: Duration,
    cache: Option<Cache<ExchangeKey, CachedToken>>,
}

#[bon::bon]
impl TokenExchanger {
    /// Creates an exchanger.
    ///
    /// A `cache_max_ttl` of zero disables the exchanged-token cache.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::{sync::Arc, time::Duration};
    ///
    /// use authbridge_processor::{
    ///     credentials::{CredentialStore, Credentials},
    ///     outbound::{ClientAuthMethod, TokenExchanger},
    /// };
    ///
    /// let store = Arc::new(CredentialStore::new(Credentials::builder().client_secret("").build()));
    /// let exchanger = TokenExchanger::builder()
    ///     .store(store)
    ///     .timeout(Duration::from_secs(2))
    ///     .client_auth(ClientAuthMethod::ClientSecretBasic)
    ///     .build();
    /// ```
    #[builder]
    pub fn new(
        store: Arc<CredentialStore>,
        #[builder(default)] client: reqwest::Client,
        #[builder(default = DEFAULT_HTTP_TIMEOUT)] timeout: Duration,
        #[builder(default)] client_auth: ClientAuthMethod,
        #[builder(default = DEFAULT_TOKEN_CACHE_MAX_TTL)] cache_max_ttl: Duration,
        #[builder(default = DEFAULT_TOKEN_CACHE_CAPACITY)] cache_capacity: u64,
    ) -> Self {
        let cache = (!cache_max_ttl.is_zero()).then(|| {
            Cache::builder().max_capacity(cache_capacity).expire_after(TokenLifetime).build()
        });
        Self { store, client, timeout, client_auth, cache_max_ttl, cache }
    }

    /// Processes an outbound request's `Authorization` header value.
    pub async fn process(&self, authorization: Option<&str>) -> OutboundDecision {
        let credentials = self.store.snapshot();
        if !credentials.is_exchange_ready() {
            tracing::debug!("client credentials or token endpoint missing, passing through");
            return OutboundDecision::PassedThrough(INCOMPLETE_CONFIG);
        }

        let Some(subject_token) = authorization.and_then(bearer_token) else {
            tracing::debug!("no bearer token on outbound request, passing through");
            return OutboundDecision::PassedThrough(NO_TOKEN);
        };

        match self.exchange_cached(&credentials, subject_token).await {
            Ok(token) => {
                OutboundDecision::Exchanged { authorization: format!("Bearer {}", token.access_token) }
            },
            Err(err) => {
                tracing::warn!(
                    audience = %credentials.target_audience,
                    error = %err,
                    "token exchange failed, forwarding original token"
                );
                OutboundDecision::PassedThrough(EXCHANGE_FAILED)
            },
        }
    }

    async fn exchange_cached(
        &self,
        credentials: &Credentials,
        subject_token: &str,
    ) -> Result<ExchangedToken, Arc<ProcessorError>> {
        let Some(cache) = &self.cache else {
            return self.exchange(credentials, subject_token).await.map_err(Arc::new);
        };

        let key = ExchangeKey {
            subject_token: subject_token.to_owned(),
            client_id: credentials.client_id.clone(),
            token_endpoint: credentials.token_endpoint.clone(),
            audience: credentials.target_audience.clone(),
            scope: credentials.scope_param(),
        };
        let max_ttl = self.cache_max_ttl;

        let cached = cache
            .try_get_with(key, async {
                let token = self.exchange(credentials, subject_token).await?;
                let ttl = token
                    .expires_in
                    .map_or(max_ttl, |lifetime| lifetime.saturating_sub(EXPIRY_SKEW).min(max_ttl));
                Ok::<_, ProcessorError>(CachedToken { token, ttl })
            })
            .await?;
        Ok(cached.token)
    }

    /// Performs one token exchange request, bypassing the cache.
    ///
    /// # Errors
    ///
    /// - [`ProcessorError::ExchangeTransport`] if the endpoint is unreachable or times out
    /// - [`ProcessorError::ExchangeStatus`] on a non-2xx answer
    /// - [`ProcessorError::MalformedResponse`] if the answer has no usable `access_token`
    #[tracing::instrument(
        skip_all,
        fields(audience = %credentials.target_audience, token_endpoint = %credentials.token_endpoint)
    )]
    pub async fn exchange(
        &self,
        credentials: &Credentials,
        subject_token: &str,
    ) -> Result<ExchangedToken, ProcessorError> {
        fail_point!("token-exchange-before-send", |_| {
            Err(ProcessorError::ExchangeStatus {
                status: 503,
                message: "injected failure before send".into(),
            })
        });

        let scope = credentials.scope_param();
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", GRANT_TYPE_TOKEN_EXCHANGE),
            ("subject_token", subject_token),
            ("subject_token_type", TOKEN_TYPE_ACCESS_TOKEN),
            ("requested_token_type", TOKEN_TYPE_ACCESS_TOKEN),
        ];
        if !credentials.target_audience.is_empty() {
            form.push(("audience", credentials.target_audience.as_str()));
        }
        if !scope.is_empty() {
            form.push(("scope", scope.as_str()));
        }

        let mut request = self
            .client
            .post(&credentials.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout);
        match self.client_auth {
            ClientAuthMethod::ClientSecretPost => {
                form.push(("client_id", credentials.client_id.as_str()));
                form.push(("client_secret", credentials.client_secret.expose_secret()));
            },
            ClientAuthMethod::ClientSecretBasic => {
                request = request.basic_auth(
                    &credentials.client_id,
                    Some(credentials.client_secret.expose_secret()),
                );
            },
        }

        let response = request.form(&form).send().await.map_err(ProcessorError::ExchangeTransport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProcessorError::ExchangeStatus {
                status: status.as_u16(),
                message: oauth_error_message(&body),
            });
        }

        let body = response.bytes().await.map_err(ProcessorError::ExchangeTransport)?;
        let parsed: TokenExchangeResponse = serde_json::from_slice(&body)
            .map_err(|e| ProcessorError::malformed_response(e.to_string()))?;
        if parsed.access_token.is_empty() {
            return Err(ProcessorError::malformed_response("empty access_token"));
        }

        tracing::debug!(
            expires_in = ?parsed.expires_in,
            issued_token_type = parsed.issued_token_type.as_deref().unwrap_or_default(),
            "token exchanged"
        );
        Ok(ExchangedToken {
            access_token: Arc::from(parsed.access_token),
            expires_in: parsed.expires_in.map(Duration::from_secs),
        })
    }
}

/// Renders an OAuth error body as `error: description`, or a truncated raw body.
fn oauth_error_message(body: &str) -> String {
    match serde_json::from_str::<OAuthErrorResponse>(body) {
        Ok(OAuthErrorResponse { error, error_description: Some(description) }) => {
            format!("{error}: {description}")
        },
        Ok(OAuthErrorResponse { error, error_description: None }) => error,
        Err(_) => body.chars().take(200).collect(),
    }
}
