//! Credential bootstrap and reload.
//!
//! At startup the client id and secret are usually written to a shared
//! volume by a registration sidecar that starts alongside the processor.
//! [`bootstrap`] waits for both files for a bounded time and falls back to
//! the environment when they never show up. Bootstrap is never fatal: an
//! incomplete result only means outbound exchange passes tokens through
//! and inbound validation fails closed.
//!
//! [`reload`] re-runs the same resolution without waiting and publishes the
//! result atomically; the binary calls it on `SIGHUP`.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use authbridge_authn::SigningKeyCache;
use secrecy::SecretString;
use tokio::time::Instant;

use crate::{
    credentials::{CredentialStore, Credentials},
    error::{ProcessorError, Result},
};

/// Default client-id file on the shared volume.
pub const DEFAULT_CLIENT_ID_FILE: &str = "/shared/client-id.txt";

/// Default client-secret file on the shared volume.
pub const DEFAULT_CLIENT_SECRET_FILE: &str = "/shared/client-secret.txt";

/// Default time to wait for the credential files.
pub const DEFAULT_CREDENTIAL_WAIT: Duration = Duration::from_secs(60);

/// Default interval between checks for the credential files.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lower bound on the file poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Where the client credentials came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Both credential files were present and non-empty.
    Files,
    /// The files never appeared; `CLIENT_ID` / `CLIENT_SECRET` were used.
    Environment,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Files => f.write_str("files"),
            Self::Environment => f.write_str("environment"),
        }
    }
}

/// Inputs to credential resolution.
#[derive(Debug, Clone, bon::Builder)]
pub struct BootstrapConfig {
    /// File holding the client id.
    #[builder(into, default = PathBuf::from(DEFAULT_CLIENT_ID_FILE))]
    pub client_id_file: PathBuf,

    /// File holding the client secret.
    #[builder(into, default = PathBuf::from(DEFAULT_CLIENT_SECRET_FILE))]
    pub client_secret_file: PathBuf,

    /// Fallback client id (`CLIENT_ID`).
    #[builder(into, default)]
    pub env_client_id: String,

    /// Fallback client secret (`CLIENT_SECRET`).
    #[builder(into)]
    pub env_client_secret: Option<SecretString>,

    /// How long to wait for the files before falling back.
    #[builder(default = DEFAULT_CREDENTIAL_WAIT)]
    pub wait: Duration,

    /// Interval between file checks.
    #[builder(default = DEFAULT_POLL_INTERVAL)]
    pub poll_interval: Duration,

    /// Static parameters copied into every resolved snapshot.
    pub settings: StaticSettings,
}

/// Parameters read once from configuration, never polled.
#[derive(Debug, Clone, Default, bon::Builder)]
pub struct StaticSettings {
    /// Token endpoint (`TOKEN_URL`).
    #[builder(into, default)]
    pub token_url: String,
    /// Expected inbound issuer (`ISSUER`).
    #[builder(into, default)]
    pub issuer: String,
    /// Expected inbound audience (`EXPECTED_AUDIENCE`).
    #[builder(into)]
    pub expected_audience: Option<String>,
    /// Outbound audience (`TARGET_AUDIENCE`).
    #[builder(into, default)]
    pub target_audience: String,
    /// Outbound scopes (`TARGET_SCOPES`).
    #[builder(default)]
    pub target_scopes: Vec<String>,
    /// JWKS endpoint override (`JWKS_URL`).
    #[builder(into)]
    pub jwks_url: Option<String>,
}

impl BootstrapConfig {
    fn credentials(&self, client_id: String, client_secret: SecretString) -> Credentials {
        let settings = self.settings.clone();
        Credentials {
            client_id,
            client_secret,
            token_endpoint: settings.token_url,
            issuer: settings.issuer,
            expected_audience: settings.expected_audience.filter(|aud| !aud.is_empty()),
            target_audience: settings.target_audience,
            target_scopes: settings.target_scopes,
            jwks_url: settings.jwks_url.filter(|url| !url.is_empty()),
        }
    }

    fn environment_credentials(&self) -> Credentials {
        let secret =
            self.env_client_secret.clone().unwrap_or_else(|| SecretString::from(String::new()));
        self.credentials(self.env_client_id.clone(), secret)
    }
}

/// Resolves the initial credentials, waiting up to `config.wait` for the
/// credential files.
///
/// Never fails: when the files do not appear in time the environment values
/// are used, even if they are empty.
#[tracing::instrument(skip(config), fields(wait = ?config.wait))]
pub async fn bootstrap(config: &BootstrapConfig) -> (Credentials, CredentialSource) {
    let deadline = Instant::now() + config.wait;
    let mut announced = false;

    loop {
        if let Some((client_id, client_secret)) = read_client_files(config).await {
            log_resolved(config, CredentialSource::Files, &client_id);
            return (config.credentials(client_id, client_secret), CredentialSource::Files);
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        if !announced {
            tracing::info!(
                client_id_file = %config.client_id_file.display(),
                client_secret_file = %config.client_secret_file.display(),
                "waiting for credential files"
            );
            announced = true;
        }
        tokio::time::sleep(poll_delay(config.poll_interval, deadline - now)).await;
    }

    tracing::warn!(wait = ?config.wait, "credential files not found in time, falling back to environment");
    let credentials = config.environment_credentials();
    log_resolved(config, CredentialSource::Environment, &credentials.client_id);
    (credentials, CredentialSource::Environment)
}

/// Time to sleep before the next file check: the configured interval, at
/// least [`MIN_POLL_INTERVAL`], never past the deadline.
fn poll_delay(interval: Duration, remaining: Duration) -> Duration {
    interval.max(MIN_POLL_INTERVAL).min(remaining)
}

/// Re-resolves credentials without waiting and publishes them.
///
/// The signing key cache is cleared so the next validation fetches from the
/// (possibly changed) key endpoint.
#[tracing::instrument(skip_all)]
pub async fn reload(
    config: &BootstrapConfig,
    store: &CredentialStore,
    key_cache: &SigningKeyCache,
) -> CredentialSource {
    let (credentials, source) = match read_client_files(config).await {
        Some((client_id, client_secret)) => {
            (config.credentials(client_id, client_secret), CredentialSource::Files)
        },
        None => (config.environment_credentials(), CredentialSource::Environment),
    };
    log_resolved(config, source, &credentials.client_id);

    store.replace(credentials);
    key_cache.clear_all();
    tracing::info!(source = %source, "credentials reloaded");
    source
}

fn log_resolved(config: &BootstrapConfig, source: CredentialSource, client_id: &str) {
    let exchange_ready = !client_id.is_empty() && !config.settings.token_url.is_empty();
    tracing::info!(
        source = %source,
        client_id,
        token_url = %config.settings.token_url,
        issuer = %config.settings.issuer,
        exchange_ready,
        "client credentials resolved"
    );
}

/// Reads both credential files; `None` unless both are present and non-empty.
async fn read_client_files(config: &BootstrapConfig) -> Option<(String, SecretString)> {
    let client_id = read_trimmed(&config.client_id_file).await;
    let client_secret = read_trimmed(&config.client_secret_file).await;

    match (client_id, client_secret) {
        (Ok(Some(client_id)), Ok(Some(client_secret))) => {
            Some((client_id, SecretString::from(client_secret)))
        },
        (id, secret) => {
            for err in [id.err(), secret.err()].into_iter().flatten() {
                tracing::warn!(error = %err, "cannot read credential file");
            }
            None
        },
    }
}

/// Reads a file and trims it. Missing and blank files are `Ok(None)`.
async fn read_trimmed(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let trimmed = contents.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_owned()))
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ProcessorError::io(path, err)),
    }
}
