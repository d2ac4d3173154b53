//! Common test utilities for integration tests
//!
//! A wiremock stand-in for a Keycloak-style realm (token, certs,
//! introspection, userinfo and discovery endpoints) plus an RSA key to sign
//! the tokens it hands out.

#![allow(dead_code)]

use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use grantwarden::AdapterConfig;
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const REALM: &str = "test";
pub const CLIENT_ID: &str = "web";
pub const CLIENT_SECRET: &str = "s3cret";
pub const KID: &str = "rsa-1";

/// Signing key shared by every test of a binary
pub struct SigningKey {
    pub private_pem: String,
    pub public_pem: String,
    pub jwk: Value,
}

pub static SIGNING_KEY: LazyLock<SigningKey> = LazyLock::new(|| {
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use rsa::traits::PublicKeyParts;

    let private_key =
        rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("Failed to generate RSA key");
    let public_key = private_key.to_public_key();

    SigningKey {
        private_pem: private_key
            .to_pkcs1_pem(LineEnding::LF)
            .expect("Failed to encode private key")
            .to_string(),
        public_pem: public_key
            .to_public_key_pem(LineEnding::LF)
            .expect("Failed to encode public key"),
        jwk: json!({
            "kty": "RSA",
            "kid": KID,
            "use": "sig",
            "alg": "RS256",
            "n": URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        }),
    }
});

/// Mock identity provider serving one realm
pub struct MockIdp {
    pub server: MockServer,
}

impl MockIdp {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn realm_path(&self) -> String {
        format!("/realms/{REALM}")
    }

    /// Expected `iss` of every token of the realm
    pub fn realm_url(&self) -> String {
        format!("{}{}", self.server.uri(), self.realm_path())
    }

    pub fn endpoint(&self, suffix: &str) -> String {
        format!("{}/protocol/openid-connect/{suffix}", self.realm_path())
    }

    /// Confidential client configuration pointing at this realm
    pub fn config(&self) -> AdapterConfig {
        AdapterConfig::new(self.server.uri(), REALM, CLIENT_ID).with_secret(CLIENT_SECRET)
    }

    /// Realm certs endpoint advertising the signing key
    pub async fn mock_certs(&self, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path(self.endpoint("certs")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "keys": [SIGNING_KEY.jwk] })),
            )
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    /// Discovery document of the realm
    pub async fn mock_discovery(&self) {
        let realm_url = self.realm_url();
        Mock::given(method("GET"))
            .and(path(format!(
                "{}/.well-known/openid-configuration",
                self.realm_path()
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": realm_url,
                "token_endpoint": format!("{realm_url}/protocol/openid-connect/token"),
                "authorization_endpoint": format!("{realm_url}/protocol/openid-connect/auth"),
                "userinfo_endpoint": format!("{realm_url}/protocol/openid-connect/userinfo"),
                "jwks_uri": format!("{realm_url}/protocol/openid-connect/certs"),
            })))
            .mount(&self.server)
            .await;
    }

    /// Token endpoint answering with `body`
    pub async fn mock_token(&self, body: Value) {
        Mock::given(method("POST"))
            .and(path(self.endpoint("token")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Token endpoint error response
    pub async fn mock_token_error(&self, status: u16, error: &str, description: &str) {
        Mock::given(method("POST"))
            .and(path(self.endpoint("token")))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": error,
                "error_description": description,
            })))
            .mount(&self.server)
            .await;
    }

    /// A token response whose tokens are all valid for this realm
    pub fn token_response(&self, access_ttl: i64) -> Value {
        json!({
            "access_token": self.mint(self.claims("Bearer", access_ttl)),
            "refresh_token": self.mint(self.claims("Refresh", 1800)),
            "id_token": self.mint(self.claims("ID", 300)),
            "token_type": "Bearer",
            "expires_in": access_ttl,
            "refresh_expires_in": 1800,
            "session_state": "session-1",
        })
    }

    /// Claims of a realm token of type `typ` living `ttl` seconds
    pub fn claims(&self, typ: &str, ttl: i64) -> Value {
        let now = current_timestamp();
        json!({
            "iss": self.realm_url(),
            "sub": "user-1",
            "aud": CLIENT_ID,
            "azp": CLIENT_ID,
            "typ": typ,
            "iat": now,
            "exp": now + ttl,
            "jti": URL_SAFE_NO_PAD.encode(rand::random::<[u8; 12]>()),
            "realm_access": { "roles": ["user"] },
            "resource_access": { CLIENT_ID: { "roles": ["editor"] } },
        })
    }

    pub fn mint(&self, claims: Value) -> String {
        mint_token(&claims, Some(KID))
    }
}

/// Sign `claims` with the shared key
pub fn mint_token(claims: &Value, kid: Option<&str>) -> String {
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};

    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(SIGNING_KEY.private_pem.as_bytes()).expect("Invalid RSA key");
    encode(&header, claims, &key).expect("Failed to encode test JWT")
}

/// Flip one bit of the signature
pub fn tamper(token: &str) -> String {
    let (signed, signature) = token.rsplit_once('.').expect("not a JWT");
    let mut bytes = URL_SAFE_NO_PAD.decode(signature).expect("bad signature encoding");
    bytes[0] ^= 0x01;
    format!("{signed}.{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// Get current Unix timestamp
/// `Authorization` value the confidential test client sends
pub fn client_basic_auth() -> String {
    format!("Basic {}", STANDARD.encode(format!("{CLIENT_ID}:{CLIENT_SECRET}")))
}

pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs() as i64
}
