use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::services::keys::cache::KeyCache;
use crate::services::keys::material::{Jwk, JwkSet, KeyMaterial};
use crate::services::keys::selector::{KeySelector, KidSelector};
use crate::services::keys::source::KeySource;
use crate::services::keys::KeyLoadError;

const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Resolves the RP signing key and the IdP verification key.
///
/// - RP: public JWK from the RP's own JWKS + private scalar held separately.
/// - IdP: public JWK from the IdP key set, selected by the token's `kid`.
///
/// Without a cache every call fetches fresh key sets.
#[derive(Clone)]
pub struct KeyMaterialProvider {
    rp_source: Arc<dyn KeySource>,
    idp_source: Arc<dyn KeySource>,
    rp_private_key: String,
    rp_kid: Option<String>,
    algorithm: String,
    selector: Arc<dyn KeySelector>,
    cache: Option<KeyCache>,
    fetch_attempts: u32,
}

impl fmt::Debug for KeyMaterialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print key material
        f.debug_struct("KeyMaterialProvider")
            .field("rp_source", &self.rp_source.id())
            .field("idp_source", &self.idp_source.id())
            .field("rp_kid", &self.rp_kid)
            .field("algorithm", &self.algorithm)
            .field("cache", &self.cache.as_ref().map(|c| c.ttl()))
            .field("fetch_attempts", &self.fetch_attempts)
            .finish_non_exhaustive()
    }
}

impl KeyMaterialProvider {
    pub fn new(
        rp_source: Arc<dyn KeySource>,
        idp_source: Arc<dyn KeySource>,
        rp_private_key: impl Into<String>,
        algorithm: impl Into<String>,
    ) -> Self {
        Self {
            rp_source,
            idp_source,
            rp_private_key: rp_private_key.into(),
            rp_kid: None,
            algorithm: algorithm.into(),
            selector: Arc::new(KidSelector),
            cache: None,
            fetch_attempts: 1,
        }
    }

    pub fn with_rp_kid(mut self, kid: Option<String>) -> Self {
        self.rp_kid = kid;
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn KeySelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_cache(mut self, cache: KeyCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_fetch_attempts(mut self, attempts: u32) -> Self {
        self.fetch_attempts = attempts.max(1);
        self
    }

    pub fn is_caching(&self) -> bool {
        self.cache.is_some()
    }

    #[instrument(skip(self))]
    pub async fn load_private_signing_key(&self) -> Result<KeyMaterial, KeyLoadError> {
        let keys = self.key_set(self.rp_source.as_ref()).await?;
        let hint = self.rp_kid.as_deref();

        let jwk = self
            .selector
            .select_key(&signing_candidates(&keys), hint)
            .ok_or_else(|| {
                warn!(kid = ?hint, "RP signing key not found in RP JWKS");
                KeyLoadError::KeyNotFound(hint.unwrap_or_default().to_string())
            })?;

        let key = KeyMaterial::from_public_jwk(&jwk, &self.algorithm)?
            .with_private_scalar(&self.rp_private_key)
            .inspect_err(|e| warn!(error = %e, "failed to attach RP private scalar"))?;

        debug!(kid = ?key.kid(), "loaded RP signing key");
        Ok(key)
    }

    #[instrument(skip(self))]
    pub async fn load_idp_public_key(
        &self,
        kid: Option<&str>,
    ) -> Result<KeyMaterial, KeyLoadError> {
        let keys = self.key_set(self.idp_source.as_ref()).await?;

        let jwk = self
            .selector
            .select_key(&signing_candidates(&keys), kid)
            .ok_or_else(|| {
                warn!(kid = ?kid, source = %self.idp_source.id(), "IdP key not found");
                KeyLoadError::KeyNotFound(kid.unwrap_or_default().to_string())
            })?;

        let key = KeyMaterial::from_public_jwk(&jwk, &self.algorithm)?;
        debug!(kid = ?key.kid(), "loaded IdP verification key");
        Ok(key)
    }

    /// Forget cached IdP keys fetched at or before `seen_at`.
    ///
    /// Returns `true` when the next load will fetch a fresh set.
    pub async fn invalidate_idp_keys(&self, seen_at: Instant) -> bool {
        match &self.cache {
            Some(cache) => cache.invalidate_if_older(self.idp_source.id(), seen_at).await,
            None => false,
        }
    }

    async fn key_set(&self, source: &dyn KeySource) -> Result<Arc<JwkSet>, KeyLoadError> {
        match &self.cache {
            Some(cache) => {
                cache
                    .get_or_fetch(source.id(), || self.fetch_with_retry(source))
                    .await
            }
            None => self.fetch_with_retry(source).await.map(Arc::new),
        }
    }

    // Key fetches are idempotent, so transport failures are retried.
    async fn fetch_with_retry(&self, source: &dyn KeySource) -> Result<JwkSet, KeyLoadError> {
        let mut attempt = 1;
        loop {
            match source.fetch().await {
                Err(e) if e.is_retryable() && attempt < self.fetch_attempts => {
                    warn!(source = %source.id(), attempt, error = %e, "key fetch failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

// Keys explicitly published for encryption are never used to sign or verify.
fn signing_candidates(keys: &JwkSet) -> Vec<Jwk> {
    keys.keys
        .iter()
        .filter(|k| k.use_.as_deref() != Some("enc"))
        .cloned()
        .collect()
}
