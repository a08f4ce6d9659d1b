use std::fmt;

use jsonwebtoken::Header;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::services::keys::KeyMaterial;

/// Lifetime of a client assertion. The IdP rejects anything longer.
pub const CLIENT_ASSERTION_TTL_SECONDS: i64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("key material has no private component")]
    MissingPrivateKey,
    #[error("private key could not be encoded")]
    InvalidKey,
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("failed to sign JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// `private_key_jwt` claims (RFC 7523).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAssertionClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// A signed client assertion. Bearer credential: the compact form is not printable via Debug.
#[derive(Clone)]
pub struct ClientAssertion {
    token: String,
    kid: Option<String>,
    claims: ClientAssertionClaims,
}

impl fmt::Debug for ClientAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientAssertion")
            .field("kid", &self.kid)
            .field("claims", &self.claims)
            .finish_non_exhaustive()
    }
}

impl ClientAssertion {
    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub fn claims(&self) -> &ClientAssertionClaims {
        &self.claims
    }
}

pub struct ClientAssertionBuilder;

impl ClientAssertionBuilder {
    /// Sign a fresh assertion for `client_id`, addressed to `audience`.
    ///
    /// `audience` is the IdP environment identifier, not the token endpoint.
    pub fn build(
        key: &KeyMaterial,
        client_id: &str,
        audience: &str,
    ) -> Result<ClientAssertion, SigningError> {
        Self::build_at(key, client_id, audience, chrono::Utc::now().timestamp())
    }

    pub fn build_at(
        key: &KeyMaterial,
        client_id: &str,
        audience: &str,
        iat: i64,
    ) -> Result<ClientAssertion, SigningError> {
        let algorithm = key.jws_algorithm().inspect_err(|e| {
            error!(error = %e, kid = ?key.kid(), "cannot sign client assertion");
        })?;
        let encoding_key = key.encoding_key().inspect_err(|e| {
            error!(error = %e, kid = ?key.kid(), "cannot sign client assertion");
        })?;

        let mut header = Header::new(algorithm);
        header.kid = key.kid().map(str::to_string);
        header.typ = Some("JWT".to_string());

        let claims = ClientAssertionClaims {
            iss: client_id.to_string(),
            sub: client_id.to_string(),
            aud: audience.to_string(),
            iat,
            exp: iat + CLIENT_ASSERTION_TTL_SECONDS,
            jti: Uuid::new_v4().to_string(),
        };

        let token = jsonwebtoken::encode(&header, &claims, &encoding_key).map_err(|e| {
            error!(error = %e, "failed to sign client assertion");
            SigningError::Jwt(e)
        })?;

        debug!(kid = ?header.kid, jti = %claims.jti, exp = claims.exp, "client assertion built");

        Ok(ClientAssertion {
            token,
            kid: header.kid,
            claims,
        })
    }
}
