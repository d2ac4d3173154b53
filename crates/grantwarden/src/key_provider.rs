//! Public key resolution for tokens of any trusted issuer
//!
//! Unlike [`GrantManager`](crate::GrantManager), which trusts a single realm,
//! a [`KeyProvider`] accepts tokens from every issuer its [`IssuerTrust`]
//! allows and locates their keys through OpenID discovery.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::keys::{DiscoveryJwksSource, JwksSource, KeyStore};
use crate::token::Token;
use crate::trust::IssuerTrust;

#[derive(Debug)]
pub struct KeyProvider {
    trust: IssuerTrust,
    keys: KeyStore,
}

impl KeyProvider {
    /// Resolve keys through each issuer's discovery document
    pub fn new(trust: IssuerTrust, http: reqwest::Client) -> Self {
        Self::with_source(trust, Arc::new(DiscoveryJwksSource::new(http)))
    }

    pub fn with_source(trust: IssuerTrust, source: Arc<dyn JwksSource>) -> Self {
        Self {
            trust,
            keys: KeyStore::new(source),
        }
    }

    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.keys = self.keys.with_min_refresh_interval(interval);
        self
    }

    pub fn trust(&self) -> &IssuerTrust {
        &self.trust
    }

    /// PEM public key that signed `raw_token`
    ///
    /// The token is only decoded here; its signature and claims are for the
    /// caller to verify with the returned key.
    ///
    /// # Errors
    ///
    /// - [`Error::Parse`] when the token cannot be decoded
    /// - [`Error::IssuerMissing`] without an `iss` claim
    /// - [`Error::IssuerNotAllowed`] / [`Error::IssuerDenied`]
    /// - [`Error::MissingKid`], [`Error::KeyNotFound`], [`Error::KeyFetchFailed`]
    pub async fn get_public_key(&self, raw_token: &str) -> Result<String> {
        let token = Token::parse(raw_token)?;
        let issuer = token.issuer().ok_or(Error::IssuerMissing)?;
        self.trust.check(issuer)?;

        let kid = token.kid().ok_or(Error::MissingKid)?;
        debug!(issuer, kid, "Resolving public key");
        self.keys.get_key(issuer, kid).await
    }

    /// Drop every cached key
    pub fn clear_cache(&self) {
        self.keys.clear_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TEST_KEY, jwk, mint};
    use crate::trust::IssuerSpec;
    use jsonwebtoken::jwk::JwkSet;
    use serde_json::json;

    #[derive(Debug)]
    struct StaticKeys;

    #[async_trait::async_trait]
    impl JwksSource for StaticKeys {
        async fn fetch_keys(&self, _issuer: &str) -> Result<JwkSet> {
            Ok(serde_json::from_value(json!({ "keys": [jwk("k1")] })).unwrap())
        }
    }

    fn provider(trust: IssuerTrust) -> KeyProvider {
        KeyProvider::with_source(trust, Arc::new(StaticKeys))
    }

    fn token(iss: &str) -> String {
        mint(&json!({ "iss": iss }), Some("k1"))
    }

    #[tokio::test]
    async fn test_regex_allow_branch() {
        let trust = IssuerTrust::default()
            .allow("https://idp/a")
            .allow(IssuerSpec::pattern(r"^https://idp/.*").unwrap());
        let pem = provider(trust).get_public_key(&token("https://idp/b")).await.unwrap();
        assert_eq!(pem.trim(), TEST_KEY.public_pem.trim());
    }

    #[tokio::test]
    async fn test_deny_wins() {
        let trust = IssuerTrust::default()
            .allow("https://idp/a")
            .deny("https://idp/a");
        let err = provider(trust)
            .get_public_key(&token("https://idp/a"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IssuerDenied(ref iss) if iss == "https://idp/a"));
    }

    #[tokio::test]
    async fn test_not_allowed_message() {
        let trust = IssuerTrust::default().allow("https://idp/a");
        let err = provider(trust)
            .get_public_key(&token("https://evil"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), r#"Token issuer "https://evil" is not allowed"#);
    }

    #[tokio::test]
    async fn test_missing_issuer_and_garbage() {
        let provider = provider(IssuerTrust::default());
        let no_iss = mint(&json!({ "sub": "u" }), Some("k1"));
        assert!(matches!(
            provider.get_public_key(&no_iss).await,
            Err(Error::IssuerMissing)
        ));
        assert!(matches!(
            provider.get_public_key("garbage").await,
            Err(Error::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_kid() {
        let trust = IssuerTrust::default().allow("https://idp/a");
        let raw = mint(&json!({ "iss": "https://idp/a" }), Some("k2"));
        let err = provider(trust).get_public_key(&raw).await.unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { ref kid, .. } if kid == "k2"));
    }
}
