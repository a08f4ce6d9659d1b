use std::collections::HashMap;
use std::time::Duration;

use axum::response::IntoResponse;
use jsonwebtoken::{Algorithm, Header, Validation};
use ndi_rp::dto::TokenExchangeParams;
use ndi_rp::services::assertion::ClientAssertionClaims;
use ndi_rp::services::id_token::compute_nonce;
use ndi_rp::services::keys::{JwkSet, KeyMaterial, KeyRole};
use ndi_rp::{RpConfig, RpError, build_relying_party};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ISSUER: &str = "https://stg-id.example.gov";
const CODE_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

struct Idp {
    server: MockServer,
    rp_key: KeyMaterial,
    idp_key: KeyMaterial,
}

impl Idp {
    async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            rp_key: KeyMaterial::generate(KeyRole::Signing, "ES256", Some("rp-sig-1".into())),
            idp_key: KeyMaterial::generate(KeyRole::Signing, "ES256", Some("idp-sig-1".into())),
        }
    }

    fn config(&self) -> RpConfig {
        self.config_with(&[])
    }

    fn config_with(&self, extra: &[(&'static str, &str)]) -> RpConfig {
        let uri = self.server.uri();
        let mut vars = HashMap::from([
            ("CLIENT_ID", "broker".to_string()),
            ("CLIENT_SECRET", "broker-secret".to_string()),
            ("IDP_CLIENT_ID", "rp-client".to_string()),
            ("IDP_ENVIRONMENT", uri.clone()),
            ("IDP_ISSUER", ISSUER.to_string()),
            ("RP_JWKS_ENDPOINT", format!("{uri}/rp/jwks")),
            ("RP_PRIVATE_KEY", self.rp_key.export_private_scalar().unwrap()),
            ("KEY_CACHE_TTL_SECONDS", "300".to_string()),
        ]);
        vars.extend(extra.iter().map(|(k, v)| (*k, v.to_string())));
        RpConfig::from_vars(|k| vars.get(k).cloned()).unwrap()
    }

    async fn mount_keys(&self, calls: u64) {
        self.mount_rp_keys(calls).await;
        Mock::given(method("GET"))
            .and(path("/.well-known/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(JwkSet {
                keys: vec![self.idp_key.public_jwk()],
            }))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    async fn mount_rp_keys(&self, calls: u64) {
        let rp_encryption = KeyMaterial::generate(KeyRole::Encryption, "ECDH-ES+A256KW", None);
        Mock::given(method("GET"))
            .and(path("/rp/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(JwkSet {
                keys: vec![self.rp_key.public_jwk(), rp_encryption.public_jwk()],
            }))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    fn id_token(&self, nonce: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some("idp-sig-1".to_string());
        let claims = serde_json::json!({
            "iss": ISSUER,
            "aud": "rp-client",
            "sub": "s=S8979373D,u=a9865837-7bd7-46ac-bef4-42a76a946424",
            "nonce": nonce,
            "amr": ["pwd", "swk"],
            "iat": now,
            "exp": now + 600
        });
        jsonwebtoken::encode(&header, &claims, &self.idp_key.encoding_key().unwrap()).unwrap()
    }
}

fn params() -> TokenExchangeParams {
    TokenExchangeParams {
        client_id: Some("broker".into()),
        client_secret: Some("broker-secret".into()),
        code: Some("n0esc3NRze7LTCu7iYzS6a5acc3f0ogp4".into()),
        code_verifier: Some(CODE_VERIFIER.into()),
        redirect_uri: Some("https://rp.example.com/callback".into()),
    }
}

#[tokio::test]
async fn exchanges_code_and_returns_verified_claims() {
    let idp = Idp::start().await;
    idp.mount_keys(1).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "opaque-at",
            "token_type": "Bearer",
            "id_token": idp.id_token(&compute_nonce(CODE_VERIFIER)),
        })))
        .expect(1)
        .mount(&idp.server)
        .await;

    let config = idp.config();
    let rp = build_relying_party(&config).unwrap();
    let outcome = rp.exchange_token(params()).await.unwrap();

    assert_eq!(outcome.upstream["access_token"], "opaque-at");
    assert_eq!(outcome.upstream["token_type"], "Bearer");
    assert!(outcome.upstream.contains_key("id_token"));
    assert_eq!(outcome.payload.iss, ISSUER);
    assert_eq!(outcome.payload.nonce, Some(compute_nonce(CODE_VERIFIER)));

    // The IdP saw exactly the six form parameters.
    let requests = idp.server.received_requests().await.unwrap();
    let token_request = requests.iter().find(|r| r.url.path() == "/token").unwrap();
    let form: HashMap<String, String> = url::form_urlencoded::parse(&token_request.body)
        .into_owned()
        .collect();
    assert_eq!(form.len(), 6);
    assert_eq!(form["grant_type"], "authorization_code");
    assert_eq!(form["client_id"], "rp-client");
    assert_eq!(form["code"], "n0esc3NRze7LTCu7iYzS6a5acc3f0ogp4");
    assert_eq!(form["redirect_uri"], "https://rp.example.com/callback");
    assert!(!form.contains_key("code_verifier"));

    // The assertion verifies with the RP's published key.
    let mut validation = Validation::new(Algorithm::ES256);
    validation.set_issuer(&["rp-client"]);
    validation.set_audience(&[config.idp_environment.as_str()]);
    let public = KeyMaterial::from_public_jwk(&idp.rp_key.public_jwk(), "ES256").unwrap();
    let assertion = jsonwebtoken::decode::<ClientAssertionClaims>(
        &form["client_assertion"],
        &public.decoding_key().unwrap(),
        &validation,
    )
    .unwrap();

    assert_eq!(assertion.header.kid.as_deref(), Some("rp-sig-1"));
    assert_eq!(assertion.claims.sub, "rp-client");
    assert_eq!(assertion.claims.exp - assertion.claims.iat, 120);
}

#[tokio::test]
async fn wrong_client_secret_never_reaches_idp() {
    let idp = Idp::start().await;
    idp.mount_keys(0).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&idp.server)
        .await;

    let mut params = params();
    params.client_secret = Some("guess".into());

    let err = build_relying_party(&idp.config())
        .unwrap()
        .exchange_token(params)
        .await
        .unwrap_err();

    assert!(matches!(err, RpError::Authentication));
    assert_eq!(err.into_response().status(), 401);
}

#[tokio::test]
async fn rejected_code_is_passed_through_unmodified() {
    let idp = Idp::start().await;
    Mock::given(method("GET"))
        .and(path("/rp/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(JwkSet {
            keys: vec![idp.rp_key.public_jwk()],
        }))
        .mount(&idp.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_raw(r#"{"error":"invalid_grant"}"#, "application/json"),
        )
        .expect(1)
        .mount(&idp.server)
        .await;

    let err = build_relying_party(&idp.config())
        .unwrap()
        .exchange_token(params())
        .await
        .unwrap_err();

    let response = err.into_response();
    assert_eq!(response.status(), 400);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], br#"{"error":"invalid_grant"}"#);
}

#[tokio::test]
async fn id_token_bound_to_another_verifier_is_rejected() {
    let idp = Idp::start().await;
    idp.mount_keys(1).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id_token": idp.id_token(&compute_nonce("a-different-session-verifier")),
        })))
        .mount(&idp.server)
        .await;

    let err = build_relying_party(&idp.config())
        .unwrap()
        .exchange_token(params())
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 400);
    assert!(err.to_string().contains("nonce"));
}

#[tokio::test]
async fn slow_token_endpoint_is_bounded_by_http_timeout() {
    let idp = Idp::start().await;
    idp.mount_rp_keys(1).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "id_token": idp.id_token("n") }))
                .set_delay(Duration::from_secs(3)),
        )
        .expect(1)
        .mount(&idp.server)
        .await;

    let rp = build_relying_party(&idp.config_with(&[("HTTP_TIMEOUT_SECONDS", "1")])).unwrap();
    let started = std::time::Instant::now();
    let err = rp.exchange_token(params()).await.unwrap_err();

    assert!(matches!(err, RpError::Transport(_)));
    assert!(started.elapsed() < Duration::from_secs(3));
}
