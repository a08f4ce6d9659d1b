//! RP discovery key set: one fresh signing key and one fresh encryption key.
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::services::keys::{Jwk, JwkSet, KeyMaterial, KeyRole};

pub const RP_SIGNING_ALGORITHM: &str = "ES256";
pub const RP_ENCRYPTION_ALGORITHM: &str = "ECDH-ES+A256KW";

/// Public RP JWKS, ready to serve from the discovery endpoint.
pub type RpJwks = JwkSet;

/// Private scalar of a generated key, for the secret store.
#[derive(Clone, Serialize, Deserialize)]
pub struct PrivateKeyEntry {
    pub kid: Option<String>,
    #[serde(rename = "use")]
    pub use_: String,
    pub d: String,
}

impl std::fmt::Debug for PrivateKeyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKeyEntry")
            .field("kid", &self.kid)
            .field("use", &self.use_)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateKeySet {
    pub keys: Vec<PrivateKeyEntry>,
}

pub struct RpJwksGenerator;

impl RpJwksGenerator {
    pub fn generate() -> RpJwks {
        Self::generate_with_private().0
    }

    /// Like [`generate`](Self::generate), also returning the private scalars.
    pub fn generate_with_private() -> (RpJwks, PrivateKeySet) {
        let issued_at = chrono::Utc::now().timestamp();
        let keys = [
            (KeyRole::Signing, RP_SIGNING_ALGORITHM),
            (KeyRole::Encryption, RP_ENCRYPTION_ALGORITHM),
        ]
        .map(|(role, alg)| {
            KeyMaterial::generate(role, alg, Some(format!("{}-{}", role.as_use(), issued_at)))
        });

        let public: Vec<Jwk> = keys.iter().map(KeyMaterial::public_jwk).collect();
        let private = keys
            .iter()
            .filter_map(|key| {
                Some(PrivateKeyEntry {
                    kid: key.kid().map(str::to_string),
                    use_: key.role().as_use().to_string(),
                    d: key.export_private_scalar()?,
                })
            })
            .collect();

        let kids: Vec<_> = public.iter().map(|k| k.kid.as_deref()).collect();
        info!(kids = ?kids, "generated RP key set");
        (JwkSet { keys: public }, PrivateKeySet { keys: private })
    }
}
