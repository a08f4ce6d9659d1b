use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::services::keys::KeyMaterial;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("invalid ID token signature")]
    InvalidSignature,
    #[error("ID token claim mismatch: {0}")]
    ClaimMismatch(&'static str),
    #[error("ID token nonce does not match code verifier")]
    NonceMismatch,
}

/// Verified ID token claims.
///
/// Unknown claims are kept in `extra` and serialised back flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    // String or array of strings.
    pub aud: Value,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `base64url_nopad(SHA256(code_verifier))`, the nonce an ID token must carry.
pub fn compute_nonce(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

/// `kid` from the (unverified) token header, used only to pick a key.
pub fn peek_kid(id_token: &str) -> Result<Option<String>, VerificationError> {
    jsonwebtoken::decode_header(id_token)
        .map(|header| header.kid)
        .map_err(|e| {
            warn!(error = %e, "malformed ID token header");
            VerificationError::InvalidSignature
        })
}

/// IdP ID token verifier (ES256).
///
/// `jsonwebtoken::Validation` checks signature, `iss`, `aud`, `exp` and `nbf`;
/// the nonce binding is checked here.
#[derive(Debug, Clone)]
pub struct IdTokenVerifier {
    validation: Validation,
}

impl IdTokenVerifier {
    pub fn new(issuer: &str, audience: &str, leeway_seconds: u64) -> Self {
        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.validate_nbf = true;
        validation.leeway = leeway_seconds;

        Self { validation }
    }

    /// Signature, standard claims, then nonce binding to `code_verifier`.
    pub fn verify(
        &self,
        id_token: &str,
        key: &KeyMaterial,
        code_verifier: &str,
    ) -> Result<IdTokenClaims, VerificationError> {
        let claims = self.verify_claims(id_token, key)?;

        let expected = compute_nonce(code_verifier);
        let matches = claims
            .nonce
            .as_deref()
            .is_some_and(|nonce| bool::from(nonce.as_bytes().ct_eq(expected.as_bytes())));

        if !matches {
            warn!(sub = %claims.sub, has_nonce = claims.nonce.is_some(), "ID token nonce mismatch");
            return Err(VerificationError::NonceMismatch);
        }

        debug!(sub = %claims.sub, "ID token nonce bound to code verifier");
        Ok(claims)
    }

    /// Signature and standard claims only. No nonce binding.
    pub fn verify_claims(
        &self,
        id_token: &str,
        key: &KeyMaterial,
    ) -> Result<IdTokenClaims, VerificationError> {
        let header = jsonwebtoken::decode_header(id_token).map_err(|e| {
            warn!(error = %e, "malformed ID token header");
            VerificationError::InvalidSignature
        })?;

        if key.jws_algorithm().ok() != Some(header.alg) {
            warn!(
                alg = ?header.alg,
                key_alg = %key.algorithm(),
                "ID token algorithm not allowed for key"
            );
            return Err(VerificationError::InvalidSignature);
        }

        let decoding_key = key.decoding_key().map_err(|e| {
            warn!(error = %e, kid = ?key.kid(), "IdP key unusable for verification");
            VerificationError::InvalidSignature
        })?;

        let data = jsonwebtoken::decode::<IdTokenClaims>(id_token, &decoding_key, &self.validation)
            .map_err(|e| {
                let mapped = map_jwt_error(e.kind());
                warn!(error = %e, kid = ?header.kid, "ID token rejected");
                mapped
            })?;

        debug!(kid = ?header.kid, sub = %data.claims.sub, "ID token verified");
        Ok(data.claims)
    }
}

fn map_jwt_error(kind: &ErrorKind) -> VerificationError {
    match kind {
        ErrorKind::ExpiredSignature => VerificationError::ClaimMismatch("exp"),
        ErrorKind::ImmatureSignature => VerificationError::ClaimMismatch("nbf"),
        ErrorKind::InvalidIssuer => VerificationError::ClaimMismatch("iss"),
        ErrorKind::InvalidAudience => VerificationError::ClaimMismatch("aud"),
        ErrorKind::InvalidSubject => VerificationError::ClaimMismatch("sub"),
        ErrorKind::MissingRequiredClaim(_) => VerificationError::ClaimMismatch("missing claim"),
        // Header was decoded beforehand, so this is the claim set.
        ErrorKind::Json(_) => VerificationError::ClaimMismatch("malformed claims"),
        _ => VerificationError::InvalidSignature,
    }
}
