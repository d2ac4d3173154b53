//! Token signature verification
//!
//! With a statically configured realm key every token is checked against it.
//! Otherwise the key named by the header `kid` is resolved through the realm
//! [`KeyStore`].

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use tracing::debug;

use crate::config::AdapterConfig;
use crate::error::{Error, Result};
use crate::keys::{KeyStore, RealmCertsSource};
use crate::token::Token;

/// Asymmetric algorithms accepted on incoming tokens
pub const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

/// Signing algorithm named by the token header, `RS256` when absent
///
/// `None` for anything outside [`ALLOWED_ALGORITHMS`].
pub fn signing_algorithm(token: &Token) -> Option<Algorithm> {
    let alg = token.header().alg.as_deref().unwrap_or("RS256");
    Algorithm::from_str(alg)
        .ok()
        .filter(|alg| ALLOWED_ALGORITHMS.contains(alg))
}

/// Key family a PEM public key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    Ec,
}

impl KeyFamily {
    fn of(alg: Algorithm) -> Self {
        match alg {
            Algorithm::ES256 | Algorithm::ES384 => Self::Ec,
            _ => Self::Rsa,
        }
    }
}

/// A parsed public key ready for verification
#[derive(Clone)]
pub struct PublicKey {
    family: KeyFamily,
    key: DecodingKey,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

impl PublicKey {
    /// Parse an RSA or EC public key from PEM
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyConversion`] when `pem` is neither.
    pub fn from_pem(pem: &str) -> Result<Self> {
        if let Ok(key) = DecodingKey::from_rsa_pem(pem.as_bytes()) {
            return Ok(Self {
                family: KeyFamily::Rsa,
                key,
            });
        }
        DecodingKey::from_ec_pem(pem.as_bytes())
            .map(|key| Self {
                family: KeyFamily::Ec,
                key,
            })
            .map_err(|e| Error::KeyConversion(format!("not an RSA or EC public key: {e}")))
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// Check `token`'s signature against this key
    ///
    /// False on a mismatch, a disallowed algorithm, an algorithm of another
    /// key family or a missing signature.
    pub fn verify(&self, token: &Token) -> bool {
        let Some(alg) = signing_algorithm(token) else {
            debug!(alg = ?token.header().alg, "Rejecting token signed with a disallowed algorithm");
            return false;
        };
        if !token.is_signed() {
            return false;
        }
        if KeyFamily::of(alg) != self.family {
            debug!(alg = ?alg, family = ?self.family, "Token algorithm does not fit the signing key");
            return false;
        }

        // Only the signature is checked here; claims are validated by the caller
        let mut validation = Validation::new(alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        match jsonwebtoken::decode::<serde_json::Value>(token.raw(), &self.key, &validation) {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, kid = ?token.kid(), "Signature verification failed");
                false
            }
        }
    }
}

/// Check `token`'s signature against a PEM public key
///
/// # Errors
///
/// Returns [`Error::KeyConversion`] when `pem` is not an RSA or EC public
/// key.
pub fn verify_with_pem(token: &Token, pem: &str) -> Result<bool> {
    Ok(PublicKey::from_pem(pem)?.verify(token))
}

/// Signature checks for tokens issued by one realm
#[derive(Debug, Clone)]
pub struct Signature {
    keys: Arc<KeyStore>,
    issuer: String,
    public_key: Option<PublicKey>,
}

impl Signature {
    /// # Errors
    ///
    /// Returns [`Error::Config`] when `public_key` is not a usable PEM key.
    pub fn new(
        keys: Arc<KeyStore>,
        issuer: impl Into<String>,
        public_key: Option<&str>,
    ) -> Result<Self> {
        let public_key = public_key
            .map(PublicKey::from_pem)
            .transpose()
            .map_err(|e| Error::Config(format!("realm-public-key: {e}")))?;
        Ok(Self {
            keys,
            issuer: issuer.into(),
            public_key,
        })
    }

    /// Build from adapter configuration, fetching keys from the realm certs
    /// endpoint with `http`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no server URL is configured or the
    /// realm public key is unusable.
    pub fn from_config(config: &AdapterConfig, http: reqwest::Client) -> Result<Self> {
        let keys = KeyStore::new(Arc::new(RealmCertsSource::new(http))).with_min_refresh_interval(
            Duration::from_secs(config.min_time_between_jwks_requests),
        );
        Self::new(
            Arc::new(keys),
            config.realm_url()?,
            config.public_key_pem().as_deref(),
        )
    }

    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Verify `token` was signed by the realm
    ///
    /// # Errors
    ///
    /// - static key: [`Error::TokenSignatureInvalid`] on mismatch
    /// - key store: [`Error::MissingKid`], [`Error::KeyNotFound`],
    ///   [`Error::KeyFetchFailed`], [`Error::PublicKeySignatureInvalid`]
    pub async fn verify(&self, token: &Token) -> Result<()> {
        if let Some(key) = &self.public_key {
            return if key.verify(token) {
                Ok(())
            } else {
                Err(Error::TokenSignatureInvalid)
            };
        }

        let kid = token.kid().ok_or(Error::MissingKid)?;
        let pem = self.keys.get_key(&self.issuer, kid).await?;
        if verify_with_pem(token, &pem)? {
            Ok(())
        } else {
            Err(Error::PublicKeySignatureInvalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TEST_KEY, jwk, mint, tamper, with_header};
    use serde_json::json;

    #[derive(Debug)]
    struct NoKeys;

    #[async_trait::async_trait]
    impl crate::keys::JwksSource for NoKeys {
        async fn fetch_keys(&self, _issuer: &str) -> Result<jsonwebtoken::jwk::JwkSet> {
            Err(Error::KeyFetchFailed("offline".to_string()))
        }
    }

    #[derive(Debug)]
    struct RealmKey;

    #[async_trait::async_trait]
    impl crate::keys::JwksSource for RealmKey {
        async fn fetch_keys(&self, _issuer: &str) -> Result<jsonwebtoken::jwk::JwkSet> {
            Ok(serde_json::from_value(json!({ "keys": [jwk("k1")] })).unwrap())
        }
    }

    fn ec_header_over_rsa_signature() -> Token {
        let raw = mint(&json!({"sub": "u"}), Some("k1"));
        Token::parse(&with_header(&raw, &json!({"alg": "ES256", "kid": "k1"}))).unwrap()
    }

    #[test]
    fn test_valid_signature() {
        let token = Token::parse(&mint(&json!({"sub": "u"}), Some("k1"))).unwrap();
        assert!(verify_with_pem(&token, &TEST_KEY.public_pem).unwrap());
    }

    #[test]
    fn test_tampered_signature() {
        let token = Token::parse(&tamper(&mint(&json!({"sub": "u"}), Some("k1")))).unwrap();
        assert!(!verify_with_pem(&token, &TEST_KEY.public_pem).unwrap());
    }

    #[test]
    fn test_symmetric_algorithm_is_refused() {
        let header = jsonwebtoken::Header::new(Algorithm::HS256);
        let raw = jsonwebtoken::encode(
            &header,
            &json!({"sub": "u"}),
            &jsonwebtoken::EncodingKey::from_secret(TEST_KEY.public_pem.as_bytes()),
        )
        .unwrap();
        let token = Token::parse(&raw).unwrap();

        assert_eq!(signing_algorithm(&token), None);
        assert!(!verify_with_pem(&token, &TEST_KEY.public_pem).unwrap());
    }

    #[test]
    fn test_key_family_follows_pem() {
        let key = PublicKey::from_pem(&TEST_KEY.public_pem).unwrap();
        assert_eq!(key.family(), KeyFamily::Rsa);
        assert!(matches!(
            PublicKey::from_pem("-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n"),
            Err(Error::KeyConversion(_))
        ));
    }

    #[test]
    fn test_algorithm_of_another_family_is_a_mismatch() {
        let token = ec_header_over_rsa_signature();
        assert_eq!(signing_algorithm(&token), Some(Algorithm::ES256));
        assert!(!verify_with_pem(&token, &TEST_KEY.public_pem).unwrap());
    }

    #[tokio::test]
    async fn test_family_mismatch_rejects_token_on_both_paths() {
        let token = ec_header_over_rsa_signature();

        let pinned = Signature::new(
            Arc::new(KeyStore::new(Arc::new(NoKeys))),
            "https://idp/realms/r",
            Some(&TEST_KEY.public_pem),
        )
        .unwrap();
        let err = pinned.verify(&token).await.unwrap_err();
        assert!(matches!(err, Error::TokenSignatureInvalid));
        assert!(err.is_token_rejection());

        let fetched = Signature::new(
            Arc::new(KeyStore::new(Arc::new(RealmKey))),
            "https://idp/realms/r",
            None,
        )
        .unwrap();
        let err = fetched.verify(&token).await.unwrap_err();
        assert!(matches!(err, Error::PublicKeySignatureInvalid));
        assert!(err.is_token_rejection());
    }

    #[test]
    fn test_unusable_realm_key_fails_at_construction() {
        let result = Signature::new(
            Arc::new(KeyStore::new(Arc::new(NoKeys))),
            "https://idp/realms/r",
            Some("not a key"),
        );
        assert!(matches!(result, Err(Error::Config(ref msg)) if msg.starts_with("realm-public-key")));
    }

    #[tokio::test]
    async fn test_static_key_path() {
        let signature = Signature::new(
            Arc::new(KeyStore::new(Arc::new(NoKeys))),
            "https://idp/realms/r",
            Some(&TEST_KEY.public_pem),
        )
        .unwrap();

        // No kid needed when the realm key is pinned
        let good = Token::parse(&mint(&json!({"sub": "u"}), None)).unwrap();
        assert!(signature.verify(&good).await.is_ok());

        let bad = Token::parse(&tamper(&mint(&json!({"sub": "u"}), None))).unwrap();
        assert!(matches!(
            signature.verify(&bad).await,
            Err(Error::TokenSignatureInvalid)
        ));

        let keyless = Signature::new(
            Arc::new(KeyStore::new(Arc::new(NoKeys))),
            "https://idp/realms/r",
            None,
        )
        .unwrap();
        assert!(matches!(keyless.verify(&good).await, Err(Error::MissingKid)));
    }
}
