//! Command-line and environment configuration.
//!
//! Every setting is a `--kebab-case` flag with an environment fallback.
//! Durations use humantime syntax (`500ms`, `5s`, `1m`).

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;

use crate::{
    bootstrap::{
        BootstrapConfig, DEFAULT_CLIENT_ID_FILE, DEFAULT_CLIENT_SECRET_FILE, StaticSettings,
    },
    bypass::BypassMatcher,
    outbound::{ClientAuthMethod, DEFAULT_TOKEN_CACHE_CAPACITY},
    telemetry::LogFormat,
};

/// Environment variable holding the inbound bypass list.
///
/// Read directly rather than through clap so that an explicitly empty value
/// (bypass nothing) stays distinguishable from an unset one (defaults).
pub const BYPASS_ENV: &str = "BYPASS_INBOUND_PATHS";

/// AuthBridge ext_authz processor.
#[derive(Debug, Parser)]
#[command(name = "authbridge", version, about)]
pub struct Cli {
    /// Address the authorization service listens on.
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:9090")]
    pub listen_addr: SocketAddr,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// File holding the client id, written by the registration sidecar.
    #[arg(long, env = "CLIENT_ID_FILE", default_value = DEFAULT_CLIENT_ID_FILE)]
    pub client_id_file: PathBuf,

    /// File holding the client secret.
    #[arg(long, env = "CLIENT_SECRET_FILE", default_value = DEFAULT_CLIENT_SECRET_FILE)]
    pub client_secret_file: PathBuf,

    /// Fallback client id when the files never appear.
    #[arg(long, env = "CLIENT_ID", default_value = "")]
    pub client_id: String,

    /// Fallback client secret when the files never appear.
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// How long to wait for the credential files at startup.
    #[arg(long, env = "CREDENTIAL_WAIT", default_value = "60s", value_parser = humantime::parse_duration)]
    pub credential_wait: Duration,

    /// Interval between checks for the credential files.
    #[arg(long, env = "CREDENTIAL_POLL_INTERVAL", default_value = "1s", value_parser = humantime::parse_duration)]
    pub credential_poll_interval: Duration,

    /// Identity provider token endpoint.
    #[arg(long, env = "TOKEN_URL", default_value = "")]
    pub token_url: String,

    /// Issuer inbound tokens must carry.
    #[arg(long, env = "ISSUER", default_value = "")]
    pub issuer: String,

    /// Audience inbound tokens must carry; unset disables the check.
    #[arg(long, env = "EXPECTED_AUDIENCE")]
    pub expected_audience: Option<String>,

    /// Audience requested for outbound exchanges.
    #[arg(long, env = "TARGET_AUDIENCE", default_value = "")]
    pub target_audience: String,

    /// Scopes requested for outbound exchanges, separated by spaces or commas.
    #[arg(long, env = "TARGET_SCOPES", default_value = "")]
    pub target_scopes: String,

    /// JWKS endpoint; derived from the token endpoint when unset.
    #[arg(long, env = "JWKS_URL")]
    pub jwks_url: Option<String>,

    /// Proactive JWKS refresh interval; unset refreshes on unknown kids only.
    #[arg(long, env = "JWKS_CACHE_TTL", value_parser = humantime::parse_duration)]
    pub jwks_cache_ttl: Option<Duration>,

    /// Comma-separated inbound bypass patterns. Falls back to
    /// `BYPASS_INBOUND_PATHS`; an empty value bypasses nothing.
    #[arg(long)]
    pub bypass_inbound_paths: Option<String>,

    /// Timeout for JWKS and token-endpoint requests.
    #[arg(long, env = "HTTP_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    pub http_timeout: Duration,

    /// Deadline for one processing session.
    #[arg(long, env = "SESSION_TIMEOUT", default_value = "10s", value_parser = humantime::parse_duration)]
    pub session_timeout: Duration,

    /// Upper bound on exchanged-token reuse; `0s` disables the cache.
    #[arg(long, env = "TOKEN_CACHE_MAX_TTL", default_value = "60s", value_parser = humantime::parse_duration)]
    pub token_cache_max_ttl: Duration,

    /// Maximum number of cached exchanged tokens.
    #[arg(long, env = "TOKEN_CACHE_CAPACITY", default_value_t = DEFAULT_TOKEN_CACHE_CAPACITY)]
    pub token_cache_capacity: u64,

    /// How the client authenticates to the token endpoint.
    #[arg(long, env = "CLIENT_AUTH", value_enum, default_value_t = ClientAuthMethod::ClientSecretPost)]
    pub client_auth: ClientAuthMethod,
}

impl Cli {
    /// Splits `--target-scopes` on whitespace and commas.
    #[must_use]
    pub fn target_scopes(&self) -> Vec<String> {
        split_scopes(&self.target_scopes)
    }

    /// Credential resolution inputs.
    #[must_use]
    pub fn bootstrap_config(&self) -> BootstrapConfig {
        let settings = StaticSettings::builder()
            .token_url(self.token_url.as_str())
            .issuer(self.issuer.as_str())
            .maybe_expected_audience(self.expected_audience.clone())
            .target_audience(self.target_audience.as_str())
            .target_scopes(self.target_scopes())
            .maybe_jwks_url(self.jwks_url.clone())
            .build();

        BootstrapConfig::builder()
            .client_id_file(self.client_id_file.clone())
            .client_secret_file(self.client_secret_file.clone())
            .env_client_id(self.client_id.as_str())
            .maybe_env_client_secret(self.client_secret.clone())
            .wait(self.credential_wait)
            .poll_interval(self.credential_poll_interval)
            .settings(settings)
            .build()
    }

    /// The inbound bypass list from the flag, else the environment.
    #[must_use]
    pub fn bypass_matcher(&self) -> BypassMatcher {
        let from_env = std::env::var(BYPASS_ENV).ok();
        resolve_bypass(self.bypass_inbound_paths.as_deref(), from_env.as_deref())
    }
}

fn resolve_bypass(flag: Option<&str>, env: Option<&str>) -> BypassMatcher {
    BypassMatcher::from_config(flag.or(env))
}

fn split_scopes(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|scope| !scope.is_empty())
        .map(str::to_owned)
        .collect()
}
