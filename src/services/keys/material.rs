//! JWK / JWKS models and the `KeyMaterial` key object shared by signing,
//! verification and JWKS generation.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePrivateKey;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::services::assertion::SigningError;
use crate::services::keys::KeyLoadError;

pub const EC_KEY_TYPE: &str = "EC";
pub const P256_CURVE: &str = "P-256";

/// JSON Web Key Set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    pub fn find_key(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }
}

/// Public JSON Web Key.
///
/// Private members (`d`, ...) are not modelled: they are dropped on
/// deserialisation and can never be serialised back out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Signing,
    Encryption,
}

impl KeyRole {
    /// JWK `use` value.
    pub fn as_use(&self) -> &'static str {
        match self {
            KeyRole::Signing => "sig",
            KeyRole::Encryption => "enc",
        }
    }

    fn from_use(value: Option<&str>) -> Self {
        match value {
            Some("enc") => KeyRole::Encryption,
            _ => KeyRole::Signing,
        }
    }
}

/// A P-256 key with its JOSE metadata.
///
/// - A key used to sign carries the private scalar.
/// - A key parsed for verification only ever holds public coordinates.
/// - Key material is intentionally not printable via Debug.
#[derive(Clone)]
pub struct KeyMaterial {
    kid: Option<String>,
    algorithm: String,
    role: KeyRole,
    public: PublicKey,
    x: String,
    y: String,
    secret: Option<SecretKey>,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("role", &self.role)
            .field("curve", &P256_CURVE)
            .field("has_private", &self.secret.is_some())
            .finish()
    }
}

impl KeyMaterial {
    /// Parse a published (public) EC JWK, tagging it with the configured algorithm.
    ///
    /// A JWK `alg` that disagrees with `algorithm` is rejected.
    pub fn from_public_jwk(jwk: &Jwk, algorithm: &str) -> Result<Self, KeyLoadError> {
        if jwk.kty != EC_KEY_TYPE {
            return Err(KeyLoadError::InvalidKey("kty must be EC"));
        }
        if jwk.crv.as_deref() != Some(P256_CURVE) {
            return Err(KeyLoadError::InvalidKey("crv must be P-256"));
        }
        if let Some(alg) = jwk.alg.as_deref() {
            if alg != algorithm {
                return Err(KeyLoadError::InvalidKey("alg does not match configured algorithm"));
            }
        }

        let x = decode_coordinate(jwk.x.as_deref(), "missing x coordinate")?;
        let y = decode_coordinate(jwk.y.as_deref(), "missing y coordinate")?;

        // SEC1 uncompressed point: 0x04 || x || y
        let mut sec1 = Vec::with_capacity(65);
        sec1.push(0x04);
        sec1.extend_from_slice(&x);
        sec1.extend_from_slice(&y);

        let public = PublicKey::from_sec1_bytes(&sec1)
            .map_err(|_| KeyLoadError::InvalidKey("point is not on P-256"))?;

        Ok(Self::from_parts(
            jwk.kid.clone(),
            algorithm.to_string(),
            KeyRole::from_use(jwk.use_.as_deref()),
            public,
            None,
        ))
    }

    /// Attach the separately held private scalar (`d`, base64url) to a
    /// published key. The scalar must belong to the published point.
    pub fn with_private_scalar(mut self, d: &str) -> Result<Self, KeyLoadError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(d.trim().trim_end_matches('='))
            .map_err(|_| KeyLoadError::InvalidKey("private scalar is not base64url"))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|_| KeyLoadError::InvalidKey("private scalar is not a P-256 scalar"))?;

        if secret.public_key() != self.public {
            return Err(KeyLoadError::KeyMismatch);
        }

        self.secret = Some(secret);
        Ok(self)
    }

    /// Fresh P-256 key pair from the OS random source.
    pub fn generate(role: KeyRole, algorithm: &str, kid: Option<String>) -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self::from_parts(kid, algorithm.to_string(), role, public, Some(secret))
    }

    fn from_parts(
        kid: Option<String>,
        algorithm: String,
        role: KeyRole,
        public: PublicKey,
        secret: Option<SecretKey>,
    ) -> Self {
        let point = public.to_encoded_point(false);
        let x = point.x().map(|v| URL_SAFE_NO_PAD.encode(v)).unwrap_or_default();
        let y = point.y().map(|v| URL_SAFE_NO_PAD.encode(v)).unwrap_or_default();

        Self {
            kid,
            algorithm,
            role,
            public,
            x,
            y,
            secret,
        }
    }

    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn role(&self) -> KeyRole {
        self.role
    }

    pub fn curve(&self) -> &'static str {
        P256_CURVE
    }

    pub fn has_private(&self) -> bool {
        self.secret.is_some()
    }

    /// Public-only JWK for publication.
    pub fn public_jwk(&self) -> Jwk {
        Jwk {
            kty: EC_KEY_TYPE.to_string(),
            use_: Some(self.role.as_use().to_string()),
            kid: self.kid.clone(),
            alg: Some(self.algorithm.clone()),
            crv: Some(P256_CURVE.to_string()),
            x: Some(self.x.clone()),
            y: Some(self.y.clone()),
        }
    }

    /// base64url private scalar, for handing to a secret store.
    pub fn export_private_scalar(&self) -> Option<String> {
        self.secret
            .as_ref()
            .map(|s| URL_SAFE_NO_PAD.encode(s.to_bytes()))
    }

    /// JWS algorithm for signing / verifying with this key. Only ES256 is backed by P-256.
    pub fn jws_algorithm(&self) -> Result<Algorithm, SigningError> {
        match Algorithm::from_str(&self.algorithm) {
            Ok(Algorithm::ES256) => Ok(Algorithm::ES256),
            _ => Err(SigningError::UnsupportedAlgorithm(self.algorithm.clone())),
        }
    }

    pub fn encoding_key(&self) -> Result<EncodingKey, SigningError> {
        let secret = self.secret.as_ref().ok_or(SigningError::MissingPrivateKey)?;
        let der = secret
            .to_pkcs8_der()
            .map_err(|_| SigningError::InvalidKey)?;
        Ok(EncodingKey::from_ec_der(der.as_bytes()))
    }

    pub fn decoding_key(&self) -> Result<DecodingKey, jsonwebtoken::errors::Error> {
        DecodingKey::from_ec_components(&self.x, &self.y)
    }
}

fn decode_coordinate(value: Option<&str>, missing: &'static str) -> Result<Vec<u8>, KeyLoadError> {
    let value = value.ok_or(KeyLoadError::InvalidKey(missing))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| KeyLoadError::InvalidKey("coordinate is not base64url"))?;
    if bytes.len() != 32 {
        return Err(KeyLoadError::InvalidKey("coordinate must be 32 bytes"));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    // The IdP's published staging signing key.
    fn idp_jwk() -> Jwk {
        serde_json::from_value(serde_json::json!({
            "kty": "EC",
            "use": "sig",
            "crv": "P-256",
            "kid": "sig-1703579211",
            "x": "HXyNcaSK0JgR9Tj38I6QUxc_ad-vqLugDv9CLODh1d8",
            "y": "2Rj47XpFTj2_FlH7Edg5pRvz8SDfWu46Azanxu3Ory4",
            "alg": "ES256"
        }))
        .unwrap()
    }

    #[test]
    fn parses_published_idp_key() {
        let key = KeyMaterial::from_public_jwk(&idp_jwk(), "ES256").unwrap();

        assert_eq!(key.kid(), Some("sig-1703579211"));
        assert_eq!(key.role(), KeyRole::Signing);
        assert_eq!(key.curve(), "P-256");
        assert!(!key.has_private());
        assert_eq!(key.public_jwk(), idp_jwk());
    }

    #[test]
    fn rejects_algorithm_disagreement() {
        let err = KeyMaterial::from_public_jwk(&idp_jwk(), "ES384").unwrap_err();
        assert!(matches!(err, KeyLoadError::InvalidKey(_)));
    }

    #[test]
    fn rejects_non_p256_keys() {
        let mut jwk = idp_jwk();
        jwk.crv = Some("P-384".to_string());
        assert!(KeyMaterial::from_public_jwk(&jwk, "ES256").is_err());

        let mut jwk = idp_jwk();
        jwk.kty = "RSA".to_string();
        assert!(KeyMaterial::from_public_jwk(&jwk, "ES256").is_err());
    }

    #[test]
    fn rejects_point_off_curve() {
        let mut jwk = idp_jwk();
        jwk.y = Some(URL_SAFE_NO_PAD.encode([7u8; 32]));

        let err = KeyMaterial::from_public_jwk(&jwk, "ES256").unwrap_err();
        assert!(matches!(err, KeyLoadError::InvalidKey(_)));
    }

    #[test]
    fn private_members_are_never_deserialised_or_serialised() {
        let generated = KeyMaterial::generate(KeyRole::Signing, "ES256", Some("k1".into()));
        let mut value = serde_json::to_value(generated.public_jwk()).unwrap();
        value["d"] = serde_json::Value::String(generated.export_private_scalar().unwrap());

        let parsed: Jwk = serde_json::from_value(value).unwrap();
        let out = serde_json::to_value(&parsed).unwrap();

        assert!(out.get("d").is_none());
    }

    #[test]
    fn injects_matching_private_scalar() {
        let generated = KeyMaterial::generate(KeyRole::Signing, "ES256", Some("rp-sig".into()));
        let d = generated.export_private_scalar().unwrap();

        let key = KeyMaterial::from_public_jwk(&generated.public_jwk(), "ES256")
            .unwrap()
            .with_private_scalar(&d)
            .unwrap();

        assert!(key.has_private());
        assert!(key.encoding_key().is_ok());
    }

    #[test]
    fn rejects_scalar_of_another_key() {
        let published = KeyMaterial::generate(KeyRole::Signing, "ES256", None);
        let other = KeyMaterial::generate(KeyRole::Signing, "ES256", None);

        let err = KeyMaterial::from_public_jwk(&published.public_jwk(), "ES256")
            .unwrap()
            .with_private_scalar(&other.export_private_scalar().unwrap())
            .unwrap_err();

        assert!(matches!(err, KeyLoadError::KeyMismatch));
    }

    #[test]
    fn debug_does_not_print_key_material() {
        let key = KeyMaterial::generate(KeyRole::Signing, "ES256", None);
        let d = key.export_private_scalar().unwrap();

        assert!(!format!("{:?}", key).contains(&d));
    }
}
