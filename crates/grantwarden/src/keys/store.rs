//! Per-issuer signing key cache
//!
//! Keys are looked up by `kid`. A miss triggers at most one refetch of the
//! issuer's key set per refresh window; concurrent misses for the same
//! issuer share that single fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::jwk::Jwk;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::pem::jwk_to_pem;
use super::source::JwksSource;
use crate::config::DEFAULT_MIN_TIME_BETWEEN_JWKS_REQUESTS;
use crate::error::{Error, Result};

/// Cached key set of one issuer
#[derive(Debug, Default)]
struct KeyCacheEntry {
    keys: Vec<Jwk>,
    /// PEMs converted so far, by kid
    pem_by_kid: HashMap<String, String>,
    /// Last successful fetch
    last_fetch: Option<Instant>,
    /// Bumped whenever `keys` is replaced
    generation: u64,
}

#[derive(Debug, Default)]
struct IssuerKeys {
    state: RwLock<KeyCacheEntry>,
    /// Held for the whole miss -> refetch transition
    refresh: Mutex<()>,
}

/// Signing key cache shared by every validation of a process
pub struct KeyStore {
    source: Arc<dyn JwksSource>,
    issuers: DashMap<String, Arc<IssuerKeys>>,
    min_refresh_interval: Duration,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("source", &self.source)
            .field("issuers", &self.issuers.len())
            .field("min_refresh_interval", &self.min_refresh_interval)
            .finish()
    }
}

impl KeyStore {
    /// Create an empty cache over `source`
    pub fn new(source: Arc<dyn JwksSource>) -> Self {
        Self {
            source,
            issuers: DashMap::new(),
            min_refresh_interval: Duration::from_secs(DEFAULT_MIN_TIME_BETWEEN_JWKS_REQUESTS),
        }
    }

    /// Set the minimum time between two fetches for the same issuer
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    pub fn min_refresh_interval(&self) -> Duration {
        self.min_refresh_interval
    }

    fn entry(&self, issuer: &str) -> Arc<IssuerKeys> {
        if let Some(entry) = self.issuers.get(issuer) {
            return Arc::clone(entry.value());
        }
        Arc::clone(self.issuers.entry(issuer.to_string()).or_default().value())
    }

    /// PEM of the key `kid` published by `issuer`
    ///
    /// # Errors
    ///
    /// - [`Error::KeyNotFound`] when the issuer does not publish `kid`, or a
    ///   refetch is not allowed yet
    /// - [`Error::KeyFetchFailed`] when the key set cannot be downloaded
    /// - [`Error::KeyConversion`] when the matching JWK is unusable
    pub async fn get_key(&self, issuer: &str, kid: &str) -> Result<String> {
        let entry = self.entry(issuer);

        if let Some(pem) = Self::lookup(&entry, kid).await? {
            debug!(issuer = %issuer, kid = %kid, "Using cached signing key");
            return Ok(pem);
        }

        let _refresh = entry.refresh.lock().await;

        // Another task may have refreshed while we waited
        if let Some(pem) = Self::lookup(&entry, kid).await? {
            return Ok(pem);
        }

        if let Some(last) = entry.state.read().await.last_fetch {
            let since_last = last.elapsed();
            if since_last < self.min_refresh_interval {
                warn!(
                    issuer = %issuer,
                    kid = %kid,
                    since_last_ms = since_last.as_millis(),
                    "Not enough time elapsed since the last JWKS request, blocking the request"
                );
                return Err(Self::not_found(issuer, kid));
            }
        }

        let set = self.source.fetch_keys(issuer).await.map_err(|e| {
            error!(issuer = %issuer, error = %e, "Failed to refresh signing keys");
            match e {
                Error::KeyFetchFailed(_) => e,
                other => Error::KeyFetchFailed(other.to_string()),
            }
        })?;

        info!(issuer = %issuer, key_count = set.keys.len(), "Refreshed signing keys");
        {
            let mut state = entry.state.write().await;
            state.keys = set.keys;
            state.pem_by_kid.clear();
            state.last_fetch = Some(Instant::now());
            state.generation += 1;
        }

        Self::lookup(&entry, kid)
            .await?
            .ok_or_else(|| Self::not_found(issuer, kid))
    }

    async fn lookup(entry: &IssuerKeys, kid: &str) -> Result<Option<String>> {
        let (jwk, generation) = {
            let state = entry.state.read().await;
            if let Some(pem) = state.pem_by_kid.get(kid) {
                return Ok(Some(pem.clone()));
            }
            match state
                .keys
                .iter()
                .find(|k| k.common.key_id.as_deref() == Some(kid))
            {
                Some(jwk) => (jwk.clone(), state.generation),
                None => return Ok(None),
            }
        };

        let pem = jwk_to_pem(&jwk)?;

        let mut state = entry.state.write().await;
        if state.generation == generation {
            state.pem_by_kid.insert(kid.to_string(), pem.clone());
        }
        Ok(Some(pem))
    }

    fn not_found(issuer: &str, kid: &str) -> Error {
        Error::KeyNotFound {
            issuer: issuer.to_string(),
            kid: kid.to_string(),
        }
    }

    /// Drop every cached key set
    pub fn clear_cache(&self) {
        self.issuers.clear();
        debug!("Signing key cache cleared");
    }
}
