pub mod cache;
pub mod material;
pub mod provider;
pub mod selector;
pub mod source;

pub use cache::KeyCache;
pub use material::{Jwk, JwkSet, KeyMaterial, KeyRole};
pub use provider::KeyMaterialProvider;
pub use selector::{FirstKeySelector, KeySelector, KidSelector};
pub use source::{KeySource, RemoteJwks, StaticJwks};

/// Key material could not be obtained or parsed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyLoadError {
    #[error("key endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("key endpoint returned HTTP {0}")]
    Status(u16),
    #[error("malformed key document: {0}")]
    Malformed(String),
    #[error("key set contains no keys")]
    NoKeys,
    #[error("no published key matches kid")]
    KeyNotFound(String),
    #[error("invalid key material: {0}")]
    InvalidKey(&'static str),
    #[error("private scalar does not belong to the published key")]
    KeyMismatch,
}

impl KeyLoadError {
    // Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}
