/// Factory: build `RelyingParty` from `RpConfig`.
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{KeySelection, RpConfig};
use crate::error::RpError;
use crate::services::exchange::TokenExchangeClient;
use crate::services::keys::{
    FirstKeySelector, KeyCache, KeyMaterialProvider, KeySelector, KeySource, KidSelector,
    RemoteJwks, StaticJwks,
};
use crate::services::relying_party::RelyingParty;

pub const PINNED_IDP_KEYS_LABEL: &str = "pinned:idp";

pub fn build_relying_party(config: &RpConfig) -> Result<RelyingParty, RpError> {
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .map_err(|e| {
            warn!(error = %e, "failed to build HTTP client");
            RpError::Transport(e.to_string())
        })?;

    let rp_source: Arc<dyn KeySource> =
        Arc::new(RemoteJwks::new(config.rp_jwks_endpoint.clone(), http.clone()));

    let idp_source: Arc<dyn KeySource> = match &config.idp_keys_static {
        Some(json) => Arc::new(StaticJwks::from_json(PINNED_IDP_KEYS_LABEL, json)?),
        None => Arc::new(RemoteJwks::new(config.idp_keys_endpoint.clone(), http.clone())),
    };

    let selector: Arc<dyn KeySelector> = match config.key_selection {
        KeySelection::ByKid => Arc::new(KidSelector),
        KeySelection::First => Arc::new(FirstKeySelector),
    };

    let mut keys = KeyMaterialProvider::new(
        rp_source,
        idp_source,
        config.rp_private_key.clone(),
        config.signing_algorithm_name(),
    )
    .with_rp_kid(config.rp_kid.clone())
    .with_selector(selector)
    .with_fetch_attempts(config.key_fetch_attempts);

    if let Some(ttl) = config.key_cache_ttl {
        keys = keys.with_cache(
            KeyCache::new(ttl).with_min_refresh_interval(config.key_min_refresh_interval),
        );
    }

    let exchange = TokenExchangeClient::new(
        http,
        config.idp_token_endpoint.clone(),
        config.idp_client_id.clone(),
    )
    .with_code_verifier_forwarding(config.forward_code_verifier);

    let idp_keys = match config.idp_keys_static {
        Some(_) => PINNED_IDP_KEYS_LABEL,
        None => config.idp_keys_endpoint.as_str(),
    };
    info!(
        token_endpoint = %config.idp_token_endpoint,
        idp_keys = %idp_keys,
        key_cache_ttl = ?config.key_cache_ttl,
        "relying party configured"
    );

    Ok(RelyingParty::new(config, keys, exchange))
}
