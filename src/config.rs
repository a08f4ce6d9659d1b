/*
 * Responsibility
 * - Relying-party settings as one explicit value (RpConfig)
 * - Loading from the process environment (.env via dotenvy) in exactly one place
 * - Validation of values (missing / invalid -> ConfigError, fail at startup)
 */
use std::fmt;
use std::time::Duration;

use jsonwebtoken::Algorithm;

/// Which entry of a published key set is used when several are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeySelection {
    /// Match the `kid` hint; first entry only when there is no hint.
    #[default]
    ByKid,
    /// Always `keys[0]`.
    First,
}

impl KeySelection {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kid" | "by_kid" => Some(Self::ByKid),
            "first" => Some(Self::First),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone)]
pub struct RpConfig {
    // Confidential client allowed to call the token exchange
    pub client_id: String,
    pub client_secret: String,

    // Identifier registered with the IdP (assertion iss/sub, form client_id)
    pub idp_client_id: String,
    pub signing_algorithm: Algorithm,

    // Assertion `aud`. Kept as the literal configured string.
    pub idp_environment: String,
    pub idp_issuer: String,
    pub idp_audience: String,
    pub idp_token_endpoint: String,
    pub idp_keys_endpoint: String,
    // Pinned IdP key set (JWKS JSON). When set, the keys endpoint is not used.
    pub idp_keys_static: Option<String>,

    pub rp_jwks_endpoint: String,
    // base64url P-256 scalar `d`, never published with the JWKS
    pub rp_private_key: String,
    pub rp_kid: Option<String>,

    pub key_selection: KeySelection,
    pub http_timeout: Duration,
    pub key_cache_ttl: Option<Duration>,
    pub key_fetch_attempts: u32,
    // Cached key sets younger than this are not refreshed on verification failure
    pub key_min_refresh_interval: Duration,
    pub id_token_leeway_seconds: u64,
    pub forward_code_verifier: bool,
}

impl fmt::Debug for RpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print secrets
        f.debug_struct("RpConfig")
            .field("client_id", &self.client_id)
            .field("idp_client_id", &self.idp_client_id)
            .field("signing_algorithm", &self.signing_algorithm)
            .field("idp_environment", &self.idp_environment)
            .field("idp_issuer", &self.idp_issuer)
            .field("idp_audience", &self.idp_audience)
            .field("idp_token_endpoint", &self.idp_token_endpoint)
            .field("idp_keys_endpoint", &self.idp_keys_endpoint)
            .field("idp_keys_static", &self.idp_keys_static.is_some())
            .field("rp_jwks_endpoint", &self.rp_jwks_endpoint)
            .field("rp_kid", &self.rp_kid)
            .field("key_selection", &self.key_selection)
            .field("http_timeout", &self.http_timeout)
            .field("key_cache_ttl", &self.key_cache_ttl)
            .field("key_fetch_attempts", &self.key_fetch_attempts)
            .field("key_min_refresh_interval", &self.key_min_refresh_interval)
            .field("id_token_leeway_seconds", &self.id_token_leeway_seconds)
            .field("forward_code_verifier", &self.forward_code_verifier)
            .finish_non_exhaustive()
    }
}

impl RpConfig {
    /// JOSE `alg` name of the signing algorithm.
    pub fn signing_algorithm_name(&self) -> String {
        format!("{:?}", self.signing_algorithm)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// Blank values are treated as absent.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let client_id = require("CLIENT_ID")?;
        let client_secret = require("CLIENT_SECRET")?;
        let idp_client_id = require("IDP_CLIENT_ID")?;

        let signing_algorithm = match get("IDP_SIGNING_ALG").as_deref() {
            None | Some("ES256") => Algorithm::ES256,
            Some(_) => return Err(ConfigError::Invalid("IDP_SIGNING_ALG")),
        };

        let idp_environment = require("IDP_ENVIRONMENT")?
            .trim_end_matches('/')
            .to_string();
        validate_url(&idp_environment, "IDP_ENVIRONMENT")?;

        let idp_issuer = require("IDP_ISSUER")?;
        let idp_audience = get("IDP_AUDIENCE").unwrap_or_else(|| idp_client_id.clone());

        let idp_token_endpoint =
            get("IDP_TOKEN_ENDPOINT").unwrap_or_else(|| format!("{}/token", idp_environment));
        validate_url(&idp_token_endpoint, "IDP_TOKEN_ENDPOINT")?;

        let idp_keys_endpoint = get("IDP_KEYS_ENDPOINT")
            .unwrap_or_else(|| format!("{}/.well-known/keys", idp_environment));
        validate_url(&idp_keys_endpoint, "IDP_KEYS_ENDPOINT")?;

        let idp_keys_static = get("IDP_KEYS_JSON");

        let rp_jwks_endpoint = require("RP_JWKS_ENDPOINT")?;
        validate_url(&rp_jwks_endpoint, "RP_JWKS_ENDPOINT")?;

        let rp_private_key = require("RP_PRIVATE_KEY")?;
        let rp_kid = get("RP_KID");

        let key_selection = match get("IDP_KEY_SELECTION") {
            None => KeySelection::default(),
            Some(v) => KeySelection::parse(&v).ok_or(ConfigError::Invalid("IDP_KEY_SELECTION"))?,
        };

        let http_timeout = match parse_or(&get, "HTTP_TIMEOUT_SECONDS", 5)? {
            0 => return Err(ConfigError::Invalid("HTTP_TIMEOUT_SECONDS")),
            secs => Duration::from_secs(secs),
        };

        let key_cache_ttl = match get("KEY_CACHE_TTL_SECONDS") {
            None => None,
            Some(v) => match v.parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => return Err(ConfigError::Invalid("KEY_CACHE_TTL_SECONDS")),
            },
        };

        let key_fetch_attempts: u32 = parse_or(&get, "KEY_FETCH_ATTEMPTS", 2)?;
        if key_fetch_attempts == 0 {
            return Err(ConfigError::Invalid("KEY_FETCH_ATTEMPTS"));
        }

        let key_min_refresh_interval =
            Duration::from_secs(parse_or(&get, "KEY_MIN_REFRESH_SECONDS", 10)?);

        let id_token_leeway_seconds = parse_or(&get, "ID_TOKEN_LEEWAY_SECONDS", 60)?;

        let forward_code_verifier = match get("FORWARD_CODE_VERIFIER").as_deref() {
            None => false,
            Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(_) => return Err(ConfigError::Invalid("FORWARD_CODE_VERIFIER")),
        };

        Ok(Self {
            client_id,
            client_secret,
            idp_client_id,
            signing_algorithm,
            idp_environment,
            idp_issuer,
            idp_audience,
            idp_token_endpoint,
            idp_keys_endpoint,
            idp_keys_static,
            rp_jwks_endpoint,
            rp_private_key,
            rp_kid,
            key_selection,
            http_timeout,
            key_cache_ttl,
            key_fetch_attempts,
            key_min_refresh_interval,
            id_token_leeway_seconds,
            forward_code_verifier,
        })
    }
}

fn validate_url(value: &str, key: &'static str) -> Result<(), ConfigError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|_| ConfigError::Invalid(key))
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(v) => v.parse::<T>().map_err(|_| ConfigError::Invalid(key)),
    }
}
