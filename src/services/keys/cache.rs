//! TTL cache for fetched key sets, keyed by source id (URL).
//!
//! Concurrent readers share the cached set; a miss takes a per-source gate so
//! at most one fetch per source is in flight and the waiters reuse its result.
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

use crate::services::keys::KeyLoadError;
use crate::services::keys::material::JwkSet;

#[derive(Debug, Clone)]
struct CachedKeySet {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
}

#[derive(Clone, Debug)]
pub struct KeyCache {
    ttl: Duration,
    min_refresh: Duration,
    entries: Arc<RwLock<HashMap<String, CachedKeySet>>>,
    gates: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl KeyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            min_refresh: DEFAULT_MIN_REFRESH_INTERVAL,
            entries: Arc::new(RwLock::new(HashMap::new())),
            gates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Entries younger than `interval` survive `invalidate_if_older`.
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh = interval;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached set for `id`, or the result of `fetch` when absent or expired.
    ///
    /// Fetch errors are returned as-is and nothing is cached.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        id: &str,
        fetch: F,
    ) -> Result<Arc<JwkSet>, KeyLoadError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<JwkSet, KeyLoadError>>,
    {
        if let Some(keys) = self.fresh(id).await {
            debug!(source = %id, "key cache hit");
            return Ok(keys);
        }

        let gate = self.gate(id).await;
        let _in_flight = gate.lock().await;

        // Another task may have refreshed while we waited on the gate.
        if let Some(keys) = self.fresh(id).await {
            debug!(source = %id, "key cache filled by concurrent fetch");
            return Ok(keys);
        }

        debug!(source = %id, "key cache miss, fetching");
        let keys = Arc::new(fetch().await?);

        self.entries.write().await.insert(
            id.to_string(),
            CachedKeySet {
                keys: keys.clone(),
                fetched_at: Instant::now(),
            },
        );

        info!(source = %id, key_count = keys.keys.len(), ttl = ?self.ttl, "key set cached");
        Ok(keys)
    }

    /// Drop the entry for `id` unless it was fetched after `seen_at` or
    /// within the minimum refresh interval.
    ///
    /// Returns `true` when an entry was removed.
    pub async fn invalidate_if_older(&self, id: &str, seen_at: Instant) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(id) {
            Some(cached) if cached.fetched_at > seen_at => false,
            Some(cached) if cached.fetched_at.elapsed() < self.min_refresh => {
                debug!(
                    source = %id,
                    age = ?cached.fetched_at.elapsed(),
                    "key set refresh suppressed"
                );
                false
            }
            Some(_) => {
                entries.remove(id);
                info!(source = %id, "key cache entry invalidated");
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn fresh(&self, id: &str) -> Option<Arc<JwkSet>> {
        let entries = self.entries.read().await;
        entries
            .get(id)
            .filter(|cached| cached.fetched_at.elapsed() < self.ttl)
            .map(|cached| cached.keys.clone())
    }

    async fn gate(&self, id: &str) -> Arc<Mutex<()>> {
        let mut gates = self.gates.lock().await;
        gates.entry(id.to_string()).or_default().clone()
    }
}
