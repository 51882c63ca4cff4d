use std::sync::Arc;

use anyhow::Context;
use authbridge_authn::{KeySetSource, SigningKeyCache};
use authbridge_processor::{
    Cli, CredentialStore, DirectionRouter, InboundValidator, Server, StoreKeySetSource,
    TokenExchanger, bootstrap, telemetry,
};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_format)?;

    let bypass = cli.bypass_matcher();
    tracing::info!(
        listen_addr = %cli.listen_addr,
        bypass = ?bypass.patterns(),
        jwks_cache_ttl = ?cli.jwks_cache_ttl,
        client_auth = ?cli.client_auth,
        "starting authbridge processor"
    );

    let bootstrap_config = cli.bootstrap_config();
    let (credentials, _source) = bootstrap::bootstrap(&bootstrap_config).await;
    let store = Arc::new(CredentialStore::new(credentials));

    let client = reqwest::Client::builder()
        .connect_timeout(cli.http_timeout)
        .build()
        .context("failed to build HTTP client")?;

    let key_source: Arc<dyn KeySetSource> =
        Arc::new(StoreKeySetSource::new(Arc::clone(&store), client.clone(), cli.http_timeout));
    let key_cache = Arc::new(match cli.jwks_cache_ttl {
        Some(ttl) => SigningKeyCache::with_ttl(key_source, ttl),
        None => SigningKeyCache::new(key_source),
    });

    // A failed warm-up only delays key loading to the first inbound request.
    match key_cache.refresh().await {
        Ok(keys) => tracing::info!(keys, source = %key_cache.source(), "signing keys loaded"),
        Err(err) => tracing::warn!(error = %err, "initial signing key fetch failed"),
    }

    let inbound = InboundValidator::builder()
        .store(Arc::clone(&store))
        .key_cache(Arc::clone(&key_cache))
        .build();
    let outbound = TokenExchanger::builder()
        .store(Arc::clone(&store))
        .client(client)
        .timeout(cli.http_timeout)
        .client_auth(cli.client_auth)
        .cache_max_ttl(cli.token_cache_max_ttl)
        .cache_capacity(cli.token_cache_capacity)
        .build();
    let processor = Arc::new(
        DirectionRouter::builder()
            .bypass(bypass)
            .inbound(inbound)
            .outbound(outbound)
            .session_timeout(cli.session_timeout)
            .build(),
    );

    #[cfg(unix)]
    spawn_reload_on_sighup(bootstrap_config, store, key_cache)?;

    Server::new(cli.listen_addr, processor)
        .run(shutdown_signal())
        .await
        .context("authorization service failed")?;

    tracing::info!("shut down");
    Ok(())
}

#[cfg(unix)]
fn spawn_reload_on_sighup(
    config: authbridge_processor::BootstrapConfig,
    store: Arc<CredentialStore>,
    key_cache: Arc<SigningKeyCache>,
) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangups = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            bootstrap::reload(&config, &store, &key_cache).await;
        }
    });
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
