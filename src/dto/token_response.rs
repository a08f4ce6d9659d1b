use serde::Serialize;
use serde_json::{Map, Value};

use crate::services::id_token::IdTokenClaims;

/// Upstream token response fields, unmodified, plus the verified claims.
#[derive(Debug, Clone, Serialize)]
pub struct TokenExchangeOutcome {
    #[serde(flatten)]
    pub upstream: Map<String, Value>,
    pub payload: IdTokenClaims,
}

impl TokenExchangeOutcome {
    pub fn new(mut upstream: Map<String, Value>, payload: IdTokenClaims) -> Self {
        // `payload` is ours.
        upstream.remove("payload");
        Self { upstream, payload }
    }
}
