//! JWKS-backed signing key cache for JWT validation.
//!
//! This module provides [`SigningKeyCache`], which wraps a [`KeySetSource`]
//! with an in-memory snapshot of the published key set so that token
//! validation only reaches the identity provider when a key id is unknown.
//!
//! # Architecture
//!
//! ```text
//! JWT arrives → extract kid
//!              → look up kid in the current snapshot
//!              → miss? take the refresh gate
//!                    → another task refreshed meanwhile? look again
//!                    → otherwise fetch the full key set, publish it, look again
//!              → still missing → KeyNotFound
//! ```
//!
//! # Cache Strategy
//!
//! - **Reactive**: the set is replaced on a kid miss (at most one re-fetch per lookup)
//! - **Optional TTL**: a stale snapshot is refreshed by one caller while the others keep using the
//!   last-known-good keys
//! - **Single flight**: concurrent misses coalesce into one fetch
//! - **Invalidation**: [`clear_all`](SigningKeyCache::clear_all) drops the snapshot and discards
//!   results of fetches that were in flight when it ran
//!
//! # Examples
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use authbridge_authn::{SigningKeyCache, key_source::HttpKeySetSource};
//!
//! # async fn example() -> Result<(), authbridge_authn::AuthError> {
//! let source = HttpKeySetSource::new(
//!     reqwest::Client::new(),
//!     "http://keycloak:8080/realms/demo/protocol/openid-connect/certs",
//!     Duration::from_secs(5),
//! );
//! let cache = SigningKeyCache::new(Arc::new(source));
//! let decoding_key = cache.get_decoding_key("rsa-2024-01").await?;
//! # Ok(())
//! # }
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use fail::fail_point;
use jsonwebtoken::DecodingKey;
use parking_lot::{Mutex, RwLock};

use crate::{
    error::AuthError,
    key_source::{KeySet, KeySetSource},
};

/// An immutable published key set.
#[derive(Debug, Default)]
struct Snapshot {
    keys: KeySet,
    /// `None` until the first successful fetch (or after `clear_all`).
    fetched_at: Option<Instant>,
}

/// Cache for the verification keys published by an identity provider.
///
/// Readers take a short read lock to clone the current `Arc<Snapshot>`;
/// refreshes build a complete new snapshot and swap it in under a write
/// lock, so no reader observes a partially updated key set.
///
/// Refreshes are serialized by an async gate. A task that misses records the
/// attempt generation before queueing on the gate; if the generation moved
/// while it waited, another task already fetched on its behalf and it only
/// re-reads the snapshot (or reports that refresh's failure).
pub struct SigningKeyCache {
    source: Arc<dyn KeySetSource>,
    snapshot: RwLock<Arc<Snapshot>>,
    /// Serializes fetches. Held across the network call, never by hits.
    refresh_gate: tokio::sync::Mutex<()>,
    /// Incremented when a fetch attempt completes (success or failure).
    attempt_gen: AtomicU64,
    /// Message of the most recent failed attempt, cleared on success.
    last_error: Mutex<Option<String>>,
    /// Incremented by `clear_all`.
    ///
    /// A fetch that started before a clear must not publish its result: the
    /// key source may have been repointed in between.
    invalidation_gen: AtomicU64,
    /// Snapshot age after which the next lookup refreshes. `None` = reactive only.
    ttl: Option<Duration>,
    fetch_count: AtomicU64,
    refresh_errors_total: AtomicU64,
}

impl SigningKeyCache {
    /// Creates an empty, reactive-only cache over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn KeySetSource>) -> Self {
        Self {
            source,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            refresh_gate: tokio::sync::Mutex::new(()),
            attempt_gen: AtomicU64::new(0),
            last_error: Mutex::new(None),
            invalidation_gen: AtomicU64::new(0),
            ttl: None,
            fetch_count: AtomicU64::new(0),
            refresh_errors_total: AtomicU64::new(0),
        }
    }

    /// Creates an empty cache whose snapshot is refreshed once older than `ttl`.
    #[must_use]
    pub fn with_ttl(source: Arc<dyn KeySetSource>, ttl: Duration) -> Self {
        Self { ttl: Some(ttl), ..Self::new(source) }
    }

    /// Returns the decoding key for `kid`.
    ///
    /// Serves from the current snapshot; on a miss, refreshes the key set
    /// once (coalesced with any concurrent refresh) and looks again.
    ///
    /// # Errors
    ///
    /// - [`AuthError::KeyNotFound`] if `kid` is absent after the refresh
    /// - the refresh error if the key set could not be fetched
    #[tracing::instrument(skip(self))]
    pub async fn get_decoding_key(&self, kid: &str) -> Result<Arc<DecodingKey>, AuthError> {
        let observed_gen = self.attempt_gen.load(Ordering::Acquire);
        let snapshot = self.current();

        if let Some(key) = snapshot.keys.get(kid) {
            if !self.is_stale(&snapshot) {
                tracing::trace!("cache hit");
                return Ok(key);
            }
            return Ok(self.refresh_stale(kid, key).await);
        }
        tracing::debug!("cache miss");

        let keys = self.refresh_if_unchanged(observed_gen).await?;
        keys.get(kid).ok_or_else(|| {
            tracing::warn!(kid, source = %self.source.location(), "kid not in refreshed key set");
            AuthError::key_not_found(kid)
        })
    }

    /// Fetches the key set now, regardless of the snapshot state.
    ///
    /// Used for eager warm-up at startup. Waits for any in-flight refresh
    /// first.
    ///
    /// # Errors
    ///
    /// Returns the key source error if the fetch fails.
    pub async fn refresh(&self) -> Result<usize, AuthError> {
        let _gate = self.refresh_gate.lock().await;
        let keys = self.fetch_and_publish().await?;
        Ok(keys.len())
    }

    /// Drops the cached key set.
    ///
    /// Fetches already in flight still answer their own callers but do not
    /// publish; the next lookup fetches from the source again.
    pub fn clear_all(&self) {
        self.invalidation_gen.fetch_add(1, Ordering::Release);
        let evicted = {
            let mut guard = self.snapshot.write();
            std::mem::replace(&mut *guard, Arc::new(Snapshot::default())).keys.len()
        };
        tracing::info!(evicted, source = %self.source.location(), "signing key cache cleared");
    }

    /// Number of keys in the current snapshot.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.current().keys.len()
    }

    /// When the current snapshot was fetched, if ever.
    #[must_use]
    pub fn fetched_at(&self) -> Option<Instant> {
        self.current().fetched_at
    }

    /// Number of fetches started against the source.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    /// Number of failed fetches.
    #[must_use]
    pub fn refresh_errors_total(&self) -> u64 {
        self.refresh_errors_total.load(Ordering::Relaxed)
    }

    /// Location of the backing key source.
    #[must_use]
    pub fn source(&self) -> String {
        self.source.location()
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read())
    }

    fn is_stale(&self, snapshot: &Snapshot) -> bool {
        match (self.ttl, snapshot.fetched_at) {
            (Some(ttl), Some(fetched_at)) => fetched_at.elapsed() >= ttl,
            _ => false,
        }
    }

    /// TTL path: one caller refreshes, everyone else keeps the stale key.
    async fn refresh_stale(&self, kid: &str, stale_key: Arc<DecodingKey>) -> Arc<DecodingKey> {
        let Ok(_gate) = self.refresh_gate.try_lock() else {
            tracing::trace!("refresh in flight, serving last-known-good key");
            return stale_key;
        };
        // The gate holder before us may have just published a fresh set.
        if !self.is_stale(&self.current()) {
            return self.current().keys.get(kid).unwrap_or(stale_key);
        }
        match self.fetch_and_publish().await {
            Ok(keys) => keys.get(kid).unwrap_or_else(|| {
                // Rotated out of the published set: keep serving until the
                // token itself fails verification or expires.
                tracing::info!(kid, "kid dropped from key set, serving last-known-good key");
                stale_key
            }),
            Err(err) => {
                tracing::warn!(kid, error = %err, "TTL refresh failed, serving last-known-good key");
                stale_key
            },
        }
    }

    /// Miss path: fetch unless another task completed an attempt since
    /// `observed_gen` was read.
    async fn refresh_if_unchanged(&self, observed_gen: u64) -> Result<KeySet, AuthError> {
        let _gate = self.refresh_gate.lock().await;

        if self.attempt_gen.load(Ordering::Acquire) != observed_gen {
            if let Some(message) = self.last_error.lock().clone() {
                return Err(AuthError::key_set_fetch(
                    self.source.location(),
                    format!("concurrent refresh failed: {message}"),
                ));
            }
            tracing::debug!("key set refreshed by a concurrent lookup");
            return Ok(self.current().keys.clone());
        }

        self.fetch_and_publish().await
    }

    /// Fetches from the source and publishes the result. Caller holds the gate.
    async fn fetch_and_publish(&self) -> Result<KeySet, AuthError> {
        let invalidation_before = self.invalidation_gen.load(Ordering::Acquire);
        self.fetch_count.fetch_add(1, Ordering::Relaxed);

        let result = self.fetch().await;
        self.attempt_gen.fetch_add(1, Ordering::Release);

        let keys = match result {
            Ok(keys) => keys,
            Err(err) => {
                self.refresh_errors_total.fetch_add(1, Ordering::Relaxed);
                *self.last_error.lock() = Some(err.to_string());
                tracing::warn!(source = %self.source.location(), error = %err, "key set fetch failed");
                return Err(err);
            },
        };
        *self.last_error.lock() = None;

        if self.invalidation_gen.load(Ordering::Acquire) != invalidation_before {
            tracing::debug!("discarding fetched key set: cache cleared during fetch");
            return Ok(keys);
        }

        let snapshot = Arc::new(Snapshot { keys: keys.clone(), fetched_at: Some(Instant::now()) });
        *self.snapshot.write() = snapshot;

        tracing::info!(
            keys = keys.len(),
            kids = ?keys.kids().collect::<Vec<_>>(),
            source = %self.source.location(),
            "signing key set refreshed"
        );
        Ok(keys)
    }

    async fn fetch(&self) -> Result<KeySet, AuthError> {
        fail_point!("key-set-before-fetch", |_| {
            Err(AuthError::key_set_fetch(self.source.location(), "injected failure before fetch"))
        });
        self.source.fetch_key_set().await
    }
}
