/*
 * Responsibility
 * - Relying-party core for the national digital identity OIDC flow
 *   (private_key_jwt assertion, code exchange, ID token + nonce verification)
 * - RP key material and JWKS generation
 * - HTTP routing stays outside; errors render through RpError's IntoResponse
 */
pub mod config;
pub mod dto;
pub mod error;
pub mod services;

pub use config::{ConfigError, KeySelection, RpConfig};
pub use error::RpError;
pub use services::{RelyingParty, build_relying_party};
