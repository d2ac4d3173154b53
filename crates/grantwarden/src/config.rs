//! Adapter configuration
//!
//! Mirrors the JSON adapter document an identity provider hands out for a
//! client (`keycloak.json` style). Both the kebab-case keys of that document
//! and the camelCase spellings used by programmatic configuration are
//! accepted.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Default seconds between two JWKS downloads for the same issuer
pub const DEFAULT_MIN_TIME_BETWEEN_JWKS_REQUESTS: u64 = 10;

/// Default deadline for every outbound request
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Client credentials block of the adapter document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    /// Client secret
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub secret: Option<SecretString>,
}

/// Adapter configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AdapterConfig {
    /// Realm name
    #[serde(default = "default_realm")]
    pub realm: String,

    /// Client (application) id
    #[serde(default, rename = "resource", alias = "client-id", alias = "clientId")]
    pub client_id: Option<String>,

    /// Nested credentials (`credentials.secret`)
    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Flat secret, used when no credentials block is present
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub secret: Option<SecretString>,

    /// Public clients never send a client secret
    #[serde(default, alias = "public")]
    pub public_client: bool,

    /// Base URL of the identity provider
    #[serde(
        default,
        alias = "server-url",
        alias = "serverUrl",
        alias = "authServerUrl"
    )]
    pub auth_server_url: Option<String>,

    /// Seconds that must elapse before the JWKS is downloaded again
    #[serde(
        default = "default_min_time_between_jwks_requests",
        alias = "minTimeBetweenJwksRequests"
    )]
    pub min_time_between_jwks_requests: u64,

    /// Bearer-only clients never hold id or refresh tokens
    #[serde(default, alias = "bearerOnly")]
    pub bearer_only: bool,

    /// Base64 SPKI realm key; when set, signatures are checked against it only
    #[serde(default, alias = "realmPublicKey")]
    pub realm_public_key: Option<String>,

    /// Enforce the audience check on access tokens too
    #[serde(default, alias = "verifyTokenAudience")]
    pub verify_token_audience: bool,

    /// Deadline applied to every outbound request
    #[serde(skip, default = "default_http_timeout")]
    pub http_timeout: Duration,
}

fn default_realm() -> String {
    "master".to_string()
}

fn default_min_time_between_jwks_requests() -> u64 {
    DEFAULT_MIN_TIME_BETWEEN_JWKS_REQUESTS
}

fn default_http_timeout() -> Duration {
    DEFAULT_HTTP_TIMEOUT
}

// Empty strings in the adapter document mean "no secret"
fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()).map(SecretString::new))
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            realm: default_realm(),
            client_id: None,
            credentials: None,
            secret: None,
            public_client: false,
            auth_server_url: None,
            min_time_between_jwks_requests: DEFAULT_MIN_TIME_BETWEEN_JWKS_REQUESTS,
            bearer_only: false,
            realm_public_key: None,
            verify_token_audience: false,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl AdapterConfig {
    /// Create a configuration for a client of `realm` on `auth_server_url`
    pub fn new(
        auth_server_url: impl Into<String>,
        realm: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            realm: realm.into(),
            client_id: Some(client_id.into()),
            auth_server_url: Some(auth_server_url.into()),
            ..Self::default()
        }
    }

    /// Parse an adapter JSON document
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the document is not valid JSON or a
    /// field has the wrong type.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    /// Set the client secret
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        self.secret = (!secret.is_empty()).then(|| SecretString::new(secret));
        self.credentials = None;
        self
    }

    /// Mark the client as public
    pub fn with_public_client(mut self, public_client: bool) -> Self {
        self.public_client = public_client;
        self
    }

    /// Mark the client as bearer-only
    pub fn with_bearer_only(mut self, bearer_only: bool) -> Self {
        self.bearer_only = bearer_only;
        self
    }

    /// Pin signature checks to a static realm key
    pub fn with_realm_public_key(mut self, key: impl Into<String>) -> Self {
        self.realm_public_key = Some(key.into());
        self
    }

    /// Enforce the audience check on access tokens
    pub fn with_verify_token_audience(mut self, verify: bool) -> Self {
        self.verify_token_audience = verify;
        self
    }

    /// Set the JWKS refetch window in seconds
    pub fn with_min_time_between_jwks_requests(mut self, seconds: u64) -> Self {
        self.min_time_between_jwks_requests = seconds;
        self
    }

    /// Set the outbound request deadline
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Effective client secret, nested credentials first
    pub fn secret(&self) -> Option<&SecretString> {
        self.credentials
            .as_ref()
            .and_then(|c| c.secret.as_ref())
            .or(self.secret.as_ref())
            .filter(|s| !s.expose_secret().is_empty())
    }

    fn server_root(&self) -> Result<&str> {
        let url = self
            .auth_server_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .unwrap_or_default();
        if url.is_empty() {
            return Err(Error::Config("auth-server-url is not set".to_string()));
        }
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::Config(format!("auth-server-url {url:?}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "auth-server-url {url:?} must be http(s)"
            )));
        }
        Ok(url)
    }

    /// `{auth-server-url}/realms/{realm}`, the expected token issuer
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no server URL is configured.
    pub fn realm_url(&self) -> Result<String> {
        Ok(format!("{}/realms/{}", self.server_root()?, self.realm))
    }

    /// `{auth-server-url}/admin/realms/{realm}`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no server URL is configured.
    pub fn realm_admin_url(&self) -> Result<String> {
        Ok(format!("{}/admin/realms/{}", self.server_root()?, self.realm))
    }

    /// Realm key as a PEM document, wrapped at 64 columns
    pub fn public_key_pem(&self) -> Option<String> {
        let plain = self.realm_public_key.as_deref()?.trim();
        if plain.is_empty() {
            return None;
        }
        if plain.starts_with("-----BEGIN") {
            return Some(plain.to_string());
        }

        let chars: Vec<char> = plain.chars().collect();
        let mut pem = String::from("-----BEGIN PUBLIC KEY-----\n");
        for line in chars.chunks(64) {
            pem.extend(line);
            pem.push('\n');
        }
        pem.push_str("-----END PUBLIC KEY-----\n");
        Some(pem)
    }
}
