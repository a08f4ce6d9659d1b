//! Authorization-code grant against the IdP token endpoint.
//!
//! One POST per call. Never retried: the code is single-use.
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::services::assertion::ClientAssertion;

pub const GRANT_TYPE_AUTHORIZATION_CODE: &str = "authorization_code";
pub const CLIENT_ASSERTION_TYPE_JWT_BEARER: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// Non-2xx answer. Status and body are kept verbatim for the caller.
    #[error("token endpoint returned HTTP {status}")]
    Upstream {
        status: u16,
        body: String,
        content_type: Option<String>,
    },
    #[error("token endpoint unreachable: {0}")]
    Transport(String),
    #[error("token endpoint returned an unusable response: {0}")]
    InvalidResponse(&'static str),
}

#[derive(Serialize)]
struct TokenRequestForm<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_assertion_type: &'static str,
    client_assertion: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_verifier: Option<&'a str>,
}

/// Successful token response.
///
/// `fields` is the upstream JSON object exactly as received.
#[derive(Debug, Clone)]
pub struct TokenExchangeResponse {
    id_token: String,
    fields: Map<String, Value>,
}

impl TokenExchangeResponse {
    fn from_body(body: &[u8]) -> Result<Self, ExchangeError> {
        let fields: Map<String, Value> = serde_json::from_slice(body)
            .map_err(|_| ExchangeError::InvalidResponse("body is not a JSON object"))?;

        let id_token = match fields.get("id_token") {
            Some(Value::String(token)) if !token.is_empty() => token.clone(),
            _ => return Err(ExchangeError::InvalidResponse("missing id_token")),
        };

        Ok(Self { id_token, fields })
    }

    pub fn id_token(&self) -> &str {
        &self.id_token
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

#[derive(Clone, Debug)]
pub struct TokenExchangeClient {
    http: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    forward_code_verifier: bool,
}

impl TokenExchangeClient {
    pub fn new(
        http: reqwest::Client,
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            forward_code_verifier: false,
        }
    }

    /// Also send `code_verifier` (for IdPs enforcing PKCE at the token endpoint).
    pub fn with_code_verifier_forwarding(mut self, enabled: bool) -> Self {
        self.forward_code_verifier = enabled;
        self
    }

    #[instrument(skip_all, fields(endpoint = %self.token_endpoint, jti = %assertion.claims().jti))]
    pub async fn exchange(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
        assertion: &ClientAssertion,
    ) -> Result<TokenExchangeResponse, ExchangeError> {
        let form = TokenRequestForm {
            grant_type: GRANT_TYPE_AUTHORIZATION_CODE,
            client_id: &self.client_id,
            client_assertion_type: CLIENT_ASSERTION_TYPE_JWT_BEARER,
            client_assertion: assertion.as_str(),
            code,
            redirect_uri,
            code_verifier: self.forward_code_verifier.then_some(code_verifier),
        };

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, timeout = e.is_timeout(), "token endpoint unreachable");
                ExchangeError::Transport(e.to_string())
            })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await.map_err(|e| {
            warn!(error = %e, status = %status, "failed to read token endpoint response");
            ExchangeError::Transport(e.to_string())
        })?;

        if !status.is_success() {
            warn!(status = %status, "token endpoint rejected exchange");
            return Err(ExchangeError::Upstream {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
                content_type,
            });
        }

        let response = TokenExchangeResponse::from_body(&body).inspect_err(|e| {
            warn!(error = %e, status = %status, "token endpoint returned unusable success body");
        })?;

        info!(status = %status, "authorization code exchanged");
        Ok(response)
    }
}
