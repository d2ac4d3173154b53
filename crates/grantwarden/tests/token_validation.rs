//! Token validation against a mock realm
//!
//! Tests cover:
//! - The ordered validation checks of `GrantManager::validate_token`
//! - Signature failures through fetched and pinned realm keys
//! - The revocation watermark
//! - A single JWKS fetch under concurrent cache misses

mod common;

use std::sync::Arc;

use common::{CLIENT_ID, MockIdp, SIGNING_KEY, current_timestamp, mint_token, tamper};
use grantwarden::{Error, GrantManager, Token, TokenType};
use pretty_assertions::assert_eq;
use serde_json::json;

async fn rejection(manager: &GrantManager, raw: &str, expected: TokenType) -> String {
    let token = Token::parse(raw).expect("test token must parse");
    manager
        .validate_token(Some(&token), expected)
        .await
        .expect_err("token should be rejected")
        .to_string()
}

#[tokio::test]
async fn test_valid_id_token_is_returned_unchanged() {
    // GIVEN: a realm advertising the signing key
    let idp = MockIdp::start().await;
    idp.mock_certs(1).await;
    let manager = GrantManager::new(&idp.config()).unwrap();

    // WHEN: an ID token issued for this client is validated
    let raw = idp.mint(idp.claims("ID", 60));
    let token = Token::parse(&raw).unwrap();
    let validated = manager
        .validate_token(Some(&token), TokenType::Id)
        .await
        .unwrap();

    // THEN: the same token comes back
    assert_eq!(validated.raw(), raw);
    assert_eq!(validated.claims().azp.as_deref(), Some(CLIENT_ID));
}

#[tokio::test]
async fn test_expired_token() {
    let idp = MockIdp::start().await;
    idp.mock_certs(0).await;
    let manager = GrantManager::new(&idp.config()).unwrap();

    let mut claims = idp.claims("ID", 60);
    claims["exp"] = json!(current_timestamp() - 1);

    assert_eq!(
        rejection(&manager, &idp.mint(claims), TokenType::Id).await,
        "invalid token (expired)"
    );
}

#[tokio::test]
async fn test_tampered_signature_never_passes() {
    let idp = MockIdp::start().await;
    idp.mock_certs(1).await;
    let manager = GrantManager::new(&idp.config()).unwrap();

    let raw = tamper(&idp.mint(idp.claims("Bearer", 60)));
    assert_eq!(
        rejection(&manager, &raw, TokenType::Bearer).await,
        "invalid token (public key signature)"
    );
}

#[tokio::test]
async fn test_pinned_realm_key() {
    // GIVEN: the realm key configured statically, no certs endpoint calls
    let idp = MockIdp::start().await;
    idp.mock_certs(0).await;
    let config = idp.config().with_realm_public_key(SIGNING_KEY.public_pem.clone());
    let manager = GrantManager::new(&config).unwrap();

    let raw = mint_token(&idp.claims("Bearer", 60), None);
    let token = Token::parse(&raw).unwrap();
    assert!(manager.validate_token(Some(&token), TokenType::Bearer).await.is_ok());

    assert_eq!(
        rejection(&manager, &tamper(&raw), TokenType::Bearer).await,
        "invalid token (signature)"
    );
}

#[tokio::test]
async fn test_not_before_rejects_older_tokens() {
    let idp = MockIdp::start().await;
    idp.mock_certs(1).await;
    let manager = GrantManager::new(&idp.config()).unwrap();

    let raw = idp.mint(idp.claims("Bearer", 60));
    let token = Token::parse(&raw).unwrap();
    assert!(manager.validate_token(Some(&token), TokenType::Bearer).await.is_ok());

    // WHEN: the realm pushes a watermark past the token's iat
    manager.set_not_before(token.claims().iat.unwrap() + 1);

    // THEN: the token is stale from now on
    assert_eq!(
        rejection(&manager, &raw, TokenType::Bearer).await,
        "invalid token (stale token)"
    );
}

#[tokio::test]
async fn test_foreign_realm_and_missing_iat() {
    let idp = MockIdp::start().await;
    idp.mock_certs(0).await;
    let manager = GrantManager::new(&idp.config()).unwrap();

    let mut foreign = idp.claims("Bearer", 60);
    foreign["iss"] = json!(format!("{}/realms/other", idp.server.uri()));
    assert_eq!(
        rejection(&manager, &idp.mint(foreign), TokenType::Bearer).await,
        "invalid token (wrong ISS)"
    );

    let mut no_iat = idp.claims("Bearer", 60);
    no_iat.as_object_mut().unwrap().remove("iat");
    assert_eq!(
        rejection(&manager, &idp.mint(no_iat), TokenType::Bearer).await,
        "invalid token (stale token)"
    );
}

#[tokio::test]
async fn test_unknown_kid_is_not_found() {
    let idp = MockIdp::start().await;
    idp.mock_certs(1).await;
    let manager = GrantManager::new(&idp.config()).unwrap();

    let raw = mint_token(&idp.claims("Bearer", 60), Some("rotated-away"));
    let token = Token::parse(&raw).unwrap();
    let err = manager
        .validate_token(Some(&token), TokenType::Bearer)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::KeyNotFound { ref kid, .. } if kid == "rotated-away"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_concurrent_validations_fetch_keys_once() {
    // GIVEN: a cold key cache and a certs endpoint that must be hit once
    let idp = MockIdp::start().await;
    idp.mock_certs(1).await;
    let manager = Arc::new(GrantManager::new(&idp.config()).unwrap());
    let token = Token::parse(&idp.mint(idp.claims("Bearer", 60))).unwrap();

    // WHEN: many requests validate at the same time
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let token = token.clone();
            tokio::spawn(async move {
                manager
                    .validate_token(Some(&token), TokenType::Bearer)
                    .await
                    .map(|_| ())
            })
        })
        .collect();

    // THEN: all succeed; the mock verifies the single fetch on drop
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_rejected_certs_fetch_is_retryable() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    let idp = MockIdp::start().await;
    Mock::given(method("GET"))
        .and(path(idp.endpoint("certs")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&idp.server)
        .await;
    let manager = GrantManager::new(&idp.config()).unwrap();

    let token = Token::parse(&idp.mint(idp.claims("Bearer", 60))).unwrap();
    let err = manager
        .validate_token(Some(&token), TokenType::Bearer)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::KeyFetchFailed(_)));
    assert!(err.is_retryable());
}
