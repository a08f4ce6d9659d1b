use std::fmt;

use subtle::ConstantTimeEq;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::config::RpConfig;
use crate::dto::{TokenExchangeOutcome, TokenExchangeParams, VerifyParams};
use crate::error::RpError;
use crate::services::assertion::ClientAssertionBuilder;
use crate::services::exchange::TokenExchangeClient;
use crate::services::id_token::{IdTokenClaims, IdTokenVerifier, VerificationError, peek_kid};
use crate::services::jwks_gen::{RpJwks, RpJwksGenerator};
use crate::services::keys::{KeyLoadError, KeyMaterialProvider};

/// Relying-party core: client authentication, code exchange, ID token verification.
#[derive(Clone)]
pub struct RelyingParty {
    client_id: String,
    client_secret: String,
    idp_client_id: String,
    idp_environment: String,
    keys: KeyMaterialProvider,
    exchange: TokenExchangeClient,
    verifier: IdTokenVerifier,
}

impl fmt::Debug for RelyingParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print the client secret
        f.debug_struct("RelyingParty")
            .field("client_id", &self.client_id)
            .field("idp_client_id", &self.idp_client_id)
            .field("idp_environment", &self.idp_environment)
            .field("keys", &self.keys)
            .field("exchange", &self.exchange)
            .finish_non_exhaustive()
    }
}

impl RelyingParty {
    pub fn new(
        config: &RpConfig,
        keys: KeyMaterialProvider,
        exchange: TokenExchangeClient,
    ) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            idp_client_id: config.idp_client_id.clone(),
            idp_environment: config.idp_environment.clone(),
            keys,
            exchange,
            verifier: IdTokenVerifier::new(
                &config.idp_issuer,
                &config.idp_audience,
                config.id_token_leeway_seconds,
            ),
        }
    }

    /// Check confidential-client credentials. No network access.
    pub fn authenticate_client(
        &self,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> Result<(), RpError> {
        let (Some(client_id), Some(client_secret)) =
            (non_empty(client_id), non_empty(client_secret))
        else {
            return Err(RpError::Configuration("client_id / client_secret"));
        };

        let id_ok = client_id.as_bytes().ct_eq(self.client_id.as_bytes());
        let secret_ok = client_secret.as_bytes().ct_eq(self.client_secret.as_bytes());

        if !bool::from(id_ok & secret_ok) {
            warn!(client_id = %client_id, "client authentication failed");
            return Err(RpError::Authentication);
        }
        Ok(())
    }

    /// Authorization-code exchange with nonce binding to the PKCE verifier.
    #[instrument(skip_all, fields(client_id = ?params.client_id))]
    pub async fn exchange_token(
        &self,
        params: TokenExchangeParams,
    ) -> Result<TokenExchangeOutcome, RpError> {
        self.authenticate_client(params.client_id.as_deref(), params.client_secret.as_deref())?;

        let code = required(params.code.as_deref(), "code")?;
        let code_verifier = required(params.code_verifier.as_deref(), "code_verifier")?;
        let redirect_uri = required(params.redirect_uri.as_deref(), "redirect_uri")?;

        let signing_key = self.keys.load_private_signing_key().await?;
        let assertion = ClientAssertionBuilder::build(
            &signing_key,
            &self.idp_client_id,
            &self.idp_environment,
        )?;

        let response = self
            .exchange
            .exchange(code, code_verifier, redirect_uri, &assertion)
            .await?;

        let claims = self
            .verify_with_rotation(response.id_token(), Some(code_verifier))
            .await?;

        info!(sub = %claims.sub, "token exchange completed");
        Ok(TokenExchangeOutcome::new(response.into_fields(), claims))
    }

    /// Signature and claim checks only; the request carries no code verifier.
    #[instrument(skip_all)]
    pub async fn verify_id_token(&self, params: VerifyParams) -> Result<IdTokenClaims, RpError> {
        let id_token = required(params.id_token.as_deref(), "id_token")?;

        let claims = self.verify_with_rotation(id_token, None).await?;
        info!(sub = %claims.sub, "ID token verified");
        Ok(claims)
    }

    pub fn generate_jwks(&self) -> RpJwks {
        RpJwksGenerator::generate()
    }

    // A cached IdP key set may be stale after rotation: refresh once and retry.
    async fn verify_with_rotation(
        &self,
        id_token: &str,
        code_verifier: Option<&str>,
    ) -> Result<IdTokenClaims, RpError> {
        let kid = peek_kid(id_token)?;
        let started = Instant::now();

        match self.verify_once(id_token, kid.as_deref(), code_verifier).await {
            Err(e) if self.keys.is_caching() && is_rotation_symptom(&e) => {
                if !self.keys.invalidate_idp_keys(started).await {
                    // Key set was fetched during this attempt; it is already current.
                    return Err(e);
                }
                info!(
                    kid = ?kid,
                    error = %e,
                    "retrying ID token verification with refreshed IdP keys"
                );
                self.verify_once(id_token, kid.as_deref(), code_verifier).await
            }
            other => other,
        }
    }

    async fn verify_once(
        &self,
        id_token: &str,
        kid: Option<&str>,
        code_verifier: Option<&str>,
    ) -> Result<IdTokenClaims, RpError> {
        let key = self.keys.load_idp_public_key(kid).await?;

        let claims = match code_verifier {
            Some(verifier) => self.verifier.verify(id_token, &key, verifier)?,
            None => self.verifier.verify_claims(id_token, &key)?,
        };
        Ok(claims)
    }
}

fn is_rotation_symptom(e: &RpError) -> bool {
    matches!(
        e,
        RpError::Verification(VerificationError::InvalidSignature)
            | RpError::KeyLoad(KeyLoadError::KeyNotFound(_))
    )
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn required<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str, RpError> {
    non_empty(value).ok_or(RpError::Configuration(name))
}
