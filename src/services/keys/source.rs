//! Where a key set comes from.
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::services::keys::KeyLoadError;
use crate::services::keys::material::JwkSet;

/// A publisher of a JWKS document.
///
/// Implementations must be cheap to share (`Arc<dyn KeySource>`).
#[async_trait]
pub trait KeySource: Send + Sync {
    // Stable identifier (URL or label), used as the cache key and in logs.
    fn id(&self) -> &str;

    // Fetch the current key set. An empty set is an error.
    async fn fetch(&self) -> Result<JwkSet, KeyLoadError>;
}

/// JWKS served over HTTP(S).
#[derive(Clone, Debug)]
pub struct RemoteJwks {
    url: String,
    http: reqwest::Client,
}

impl RemoteJwks {
    pub fn new(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            http,
        }
    }
}

#[async_trait]
impl KeySource for RemoteJwks {
    fn id(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<JwkSet, KeyLoadError> {
        let response = self.http.get(&self.url).send().await.map_err(|e| {
            warn!(url = %self.url, error = %e, "key endpoint unreachable");
            KeyLoadError::Unreachable(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %self.url, status = %status, "key endpoint returned error status");
            return Err(KeyLoadError::Status(status.as_u16()));
        }

        let jwks: JwkSet = response.json().await.map_err(|e| {
            warn!(url = %self.url, error = %e, "key endpoint returned malformed JWKS");
            KeyLoadError::Malformed(e.to_string())
        })?;

        if jwks.keys.is_empty() {
            warn!(url = %self.url, "key endpoint returned empty key set");
            return Err(KeyLoadError::NoKeys);
        }

        debug!(url = %self.url, key_count = jwks.keys.len(), "fetched key set");
        Ok(jwks)
    }
}

/// Key set pinned in configuration.
#[derive(Clone, Debug)]
pub struct StaticJwks {
    label: String,
    keys: JwkSet,
}

impl StaticJwks {
    pub fn new(label: impl Into<String>, keys: JwkSet) -> Result<Self, KeyLoadError> {
        if keys.keys.is_empty() {
            return Err(KeyLoadError::NoKeys);
        }
        Ok(Self {
            label: label.into(),
            keys,
        })
    }

    /// Parse a JWKS document (`{"keys":[...]}`).
    pub fn from_json(label: impl Into<String>, json: &str) -> Result<Self, KeyLoadError> {
        let keys: JwkSet =
            serde_json::from_str(json).map_err(|e| KeyLoadError::Malformed(e.to_string()))?;
        Self::new(label, keys)
    }
}

#[async_trait]
impl KeySource for StaticJwks {
    fn id(&self) -> &str {
        &self.label
    }

    async fn fetch(&self) -> Result<JwkSet, KeyLoadError> {
        Ok(self.keys.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const JWKS: &str = r#"{
        "keys": [
            {
                "kty": "EC",
                "use": "sig",
                "crv": "P-256",
                "kid": "sig-1703579211",
                "x": "HXyNcaSK0JgR9Tj38I6QUxc_ad-vqLugDv9CLODh1d8",
                "y": "2Rj47XpFTj2_FlH7Edg5pRvz8SDfWu46Azanxu3Ory4",
                "alg": "ES256"
            }
        ]
    }"#;

    async fn source_for(status: u16, body: &str) -> (MockServer, RemoteJwks) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/keys"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;

        let url = format!("{}/.well-known/keys", server.uri());
        (server, RemoteJwks::new(url, reqwest::Client::new()))
    }

    #[tokio::test]
    async fn fetches_remote_key_set() {
        let (_server, source) = source_for(200, JWKS).await;

        let jwks = source.fetch().await.unwrap();
        assert_eq!(jwks.keys.len(), 1);
        assert_eq!(jwks.keys[0].kid.as_deref(), Some("sig-1703579211"));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let (_server, source) = source_for(503, "unavailable").await;

        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, KeyLoadError::Status(503)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn malformed_document_is_rejected() {
        let (_server, source) = source_for(200, r#"{"not_keys": true}"#).await;

        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, KeyLoadError::Malformed(_)));
    }

    #[tokio::test]
    async fn empty_key_set_is_rejected() {
        let (_server, source) = source_for(200, r#"{"keys": []}"#).await;

        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, KeyLoadError::NoKeys));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_retryable() {
        // Nothing listens on port 1.
        let url = "http://127.0.0.1:1/.well-known/keys";

        let err = RemoteJwks::new(url, reqwest::Client::new())
            .fetch()
            .await
            .unwrap_err();
        assert!(matches!(err, KeyLoadError::Unreachable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn static_source_serves_pinned_keys() {
        let source = StaticJwks::from_json("pinned:idp", JWKS).unwrap();

        assert_eq!(source.id(), "pinned:idp");
        assert_eq!(source.fetch().await.unwrap().keys.len(), 1);
        assert!(matches!(
            StaticJwks::from_json("pinned:idp", r#"{"keys": []}"#),
            Err(KeyLoadError::NoKeys)
        ));
    }
}
