use std::fmt;

use serde::Deserialize;

/// Token-exchange input, as parsed by the HTTP layer.
///
/// Every field is optional here; `RelyingParty` reports what is missing.
#[derive(Clone, Default, Deserialize)]
pub struct TokenExchangeParams {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code: Option<String>,
    pub code_verifier: Option<String>,
    pub redirect_uri: Option<String>,
}

impl fmt::Debug for TokenExchangeParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only the client id and redirect are safe to print
        f.debug_struct("TokenExchangeParams")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("code", &self.code.as_ref().map(|_| "<redacted>"))
            .field("code_verifier", &self.code_verifier.as_ref().map(|_| "<redacted>"))
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Verification-only input.
#[derive(Clone, Default, Deserialize)]
pub struct VerifyParams {
    pub id_token: Option<String>,
}

impl fmt::Debug for VerifyParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyParams")
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_credentials() {
        let params = TokenExchangeParams {
            client_id: Some("broker".into()),
            client_secret: Some("s3cret".into()),
            code: Some("auth-code".into()),
            code_verifier: Some("pkce-v1".into()),
            redirect_uri: Some("https://rp.example.com/cb".into()),
        };
        let printed = format!("{:?}", params);

        assert!(printed.contains("broker"));
        assert!(!printed.contains("s3cret"));
        assert!(!printed.contains("auth-code"));
        assert!(!printed.contains("pkce-v1"));
    }

    #[test]
    fn deserialises_partial_body() {
        let params: TokenExchangeParams =
            serde_json::from_str(r#"{"client_id":"broker","code":"c"}"#).unwrap();

        assert_eq!(params.client_id.as_deref(), Some("broker"));
        assert!(params.client_secret.is_none());
        assert!(params.code_verifier.is_none());
    }
}
