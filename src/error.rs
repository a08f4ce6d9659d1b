/*
 * Responsibility
 * - RpError: one error type for the relying-party operations
 * - Mapping to HTTP status + minimal safe JSON body (IntoResponse)
 * - Upstream IdP errors are replayed verbatim (status, body, content type)
 */
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::services::assertion::SigningError;
use crate::services::exchange::ExchangeError;
use crate::services::id_token::VerificationError;
use crate::services::keys::KeyLoadError;

#[derive(Debug, Error)]
pub enum RpError {
    #[error("missing {0}")]
    Configuration(&'static str),

    #[error("invalid client credentials")]
    Authentication,

    #[error(transparent)]
    KeyLoad(#[from] KeyLoadError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("identity provider returned HTTP {status}")]
    Upstream {
        status: u16,
        body: String,
        content_type: Option<String>,
    },

    #[error("identity provider unreachable: {0}")]
    Transport(String),

    #[error("identity provider returned an unusable response: {0}")]
    InvalidUpstreamResponse(&'static str),

    #[error(transparent)]
    Verification(#[from] VerificationError),
}

impl From<ExchangeError> for RpError {
    fn from(e: ExchangeError) -> Self {
        match e {
            ExchangeError::Upstream {
                status,
                body,
                content_type,
            } => RpError::Upstream {
                status,
                body,
                content_type,
            },
            ExchangeError::Transport(reason) => RpError::Transport(reason),
            ExchangeError::InvalidResponse(reason) => RpError::InvalidUpstreamResponse(reason),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponseBody {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl RpError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RpError::Configuration(_) => StatusCode::BAD_REQUEST,
            RpError::Authentication => StatusCode::UNAUTHORIZED,
            RpError::KeyLoad(_) | RpError::Signing(_) | RpError::Transport(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            RpError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            RpError::InvalidUpstreamResponse(_) => StatusCode::BAD_GATEWAY,
            RpError::Verification(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            RpError::Configuration(_) => "BAD_REQUEST",
            RpError::Authentication => "UNAUTHORIZED",
            RpError::KeyLoad(_) => "KEY_UNAVAILABLE",
            RpError::Signing(_) => "INTERNAL",
            RpError::Upstream { .. } => "UPSTREAM_ERROR",
            RpError::Transport(_) => "UPSTREAM_UNREACHABLE",
            RpError::InvalidUpstreamResponse(_) => "BAD_GATEWAY",
            RpError::Verification(VerificationError::InvalidSignature) => "INVALID_SIGNATURE",
            RpError::Verification(VerificationError::ClaimMismatch(_)) => "CLAIM_MISMATCH",
            RpError::Verification(VerificationError::NonceMismatch) => "NONCE_MISMATCH",
        }
    }

    // Never include key material, transport internals or upstream bodies.
    fn public_message(&self) -> String {
        match self {
            RpError::KeyLoad(_) => "key material unavailable".to_string(),
            RpError::Signing(_) => "internal server error".to_string(),
            RpError::Transport(_) => "identity provider unreachable".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for RpError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let RpError::Upstream {
            body, content_type, ..
        } = self
        {
            let mut response = (status, body).into_response();
            match content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
                Some(ct) => {
                    response.headers_mut().insert(header::CONTENT_TYPE, ct);
                }
                None => {
                    response.headers_mut().remove(header::CONTENT_TYPE);
                }
            }
            return response;
        }

        let body = ErrorResponseBody {
            error: ErrorBody {
                code: self.code(),
                message: self.public_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}
