//! Grant Manager
//!
//! Obtains grants from the realm token endpoint, keeps them fresh and
//! validates every token they carry.
//!
//! # Grant lifecycle
//!
//! ```text
//! obtain_* ──> create_grant ──> ensure_freshness ──> validate_grant ──> Ok(grant)
//!                                    │                     │
//!                       refresh_token POST            Err(GrantValidation)
//! ```
//!
//! `ensure_freshness` and `validate_grant` take the caller's grant by
//! `&mut` and update it in place.

mod uma;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AdapterConfig;
use crate::error::{Error, Result};
use crate::grant::Grant;
use crate::introspection::IntrospectionClient;
use crate::signature::Signature;
use crate::store::GrantStore;
use crate::token::Token;

pub use uma::{AuthzRequest, PermissionCheck, ResourcePermission, ResponseMode};

/// Token endpoint, relative to the realm URL
pub const TOKEN_PATH: &str = "/protocol/openid-connect/token";
/// Introspection endpoint, relative to the realm URL
pub const INTROSPECT_PATH: &str = "/protocol/openid-connect/token/introspect";
/// Userinfo endpoint, relative to the realm URL
pub const USERINFO_PATH: &str = "/protocol/openid-connect/userinfo";

/// Expected `typ` claim of a token under validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    /// Access tokens
    Bearer,
    /// ID tokens
    Id,
}

impl TokenType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bearer => "Bearer",
            Self::Id => "ID",
        }
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard OIDC userinfo claims
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

type GrantFuture<'a> = Pin<Box<dyn Future<Output = Result<Grant>> + Send + 'a>>;

/// Grant acquisition, refresh and validation for one realm client
pub struct GrantManager {
    realm_url: String,
    client_id: Option<String>,
    secret: Option<SecretString>,
    public_client: bool,
    bearer_only: bool,
    verify_token_audience: bool,
    /// Revocation watermark; tokens issued before it are stale
    not_before: AtomicI64,
    signature: Signature,
    introspection: IntrospectionClient,
    store: Option<Arc<dyn GrantStore>>,
    http: reqwest::Client,
}

// Manual Debug impl to keep the client secret out of logs
impl std::fmt::Debug for GrantManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantManager")
            .field("realm_url", &self.realm_url)
            .field("client_id", &self.client_id)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("public_client", &self.public_client)
            .field("bearer_only", &self.bearer_only)
            .field("verify_token_audience", &self.verify_token_audience)
            .field("not_before", &self.not_before())
            .field("signature", &self.signature)
            .field("store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl GrantManager {
    /// Create a manager from adapter configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no server URL is configured and
    /// [`Error::Transport`] when the HTTP client cannot be built.
    pub fn new(config: &AdapterConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        let signature = Signature::from_config(config, http.clone())?;
        Self::with_signature(config, http, signature)
    }

    /// Create a manager with an explicit HTTP client and signature verifier
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no server URL is configured.
    pub fn with_signature(
        config: &AdapterConfig,
        http: reqwest::Client,
        signature: Signature,
    ) -> Result<Self> {
        let realm_url = config.realm_url()?;
        let secret = config.secret().cloned();
        let introspection = IntrospectionClient::new(
            format!("{realm_url}{INTROSPECT_PATH}"),
            config.client_id.clone(),
            secret.clone(),
            http.clone(),
        );

        Ok(Self {
            realm_url,
            client_id: config.client_id.clone(),
            secret,
            public_client: config.public_client,
            bearer_only: config.bearer_only,
            verify_token_audience: config.verify_token_audience,
            not_before: AtomicI64::new(0),
            signature,
            introspection,
            store: None,
            http,
        })
    }

    /// Store whose [`GrantStore::wrap`] sees every grant built by
    /// [`GrantManager::create_grant`]
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn GrantStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn realm_url(&self) -> &str {
        &self.realm_url
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn is_public_client(&self) -> bool {
        self.public_client
    }

    pub fn is_bearer_only(&self) -> bool {
        self.bearer_only
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Current revocation watermark (seconds since the epoch)
    pub fn not_before(&self) -> i64 {
        self.not_before.load(Ordering::Acquire)
    }

    /// Move the revocation watermark; tokens with an older `iat` become stale
    pub fn set_not_before(&self, not_before: i64) {
        info!(not_before, realm_url = %self.realm_url, "Revocation watermark updated");
        self.not_before.store(not_before, Ordering::Release);
    }

    /// Resource-owner password grant
    ///
    /// `scope` defaults to `openid`.
    ///
    /// # Errors
    ///
    /// Any failure means authentication is not possible: [`Error::Http`]
    /// when the realm rejects the credentials, otherwise the grant creation
    /// errors of [`GrantManager::create_grant`].
    pub async fn obtain_directly(
        &self,
        username: &str,
        password: &str,
        scope: Option<&str>,
    ) -> Result<Grant> {
        let params = [
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
            ("scope", scope.unwrap_or("openid")),
        ];
        let body = self.post_form(TOKEN_PATH, &params, None).await?;
        self.create_grant(&body).await
    }

    /// Authorization code grant
    ///
    /// `session_id` and `session_host` let the realm address admin callbacks
    /// (logout) to this application session.
    ///
    /// # Errors
    ///
    /// Same as [`GrantManager::obtain_directly`].
    pub async fn obtain_from_code(
        &self,
        code: &str,
        session_id: Option<&str>,
        session_host: Option<&str>,
        redirect_uri: Option<&str>,
    ) -> Result<Grant> {
        let mut params = vec![("grant_type", "authorization_code"), ("code", code)];
        if let Some(session_id) = session_id {
            params.push(("client_session_state", session_id));
        }
        if let Some(session_host) = session_host {
            params.push(("client_session_host", session_host));
        }
        if let Some(redirect_uri) = redirect_uri {
            params.push(("redirect_uri", redirect_uri));
        }
        let body = self.post_form(TOKEN_PATH, &params, None).await?;
        self.create_grant(&body).await
    }

    /// Service-account grant; `scope` defaults to `openid`
    ///
    /// # Errors
    ///
    /// Same as [`GrantManager::obtain_directly`].
    pub async fn obtain_from_client_credentials(&self, scope: Option<&str>) -> Result<Grant> {
        let params = [
            ("grant_type", "client_credentials"),
            ("scope", scope.unwrap_or("openid")),
        ];
        let body = self.post_form(TOKEN_PATH, &params, None).await?;
        self.create_grant(&body).await
    }

    /// Refresh `grant` in place if its access token has expired
    ///
    /// A fresh grant is left untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::RefreshTokenMissing`] / [`Error::RefreshTokenExpired`] when
    ///   no refresh is possible; the session is over
    /// - [`Error::Http`] when the realm rejects the refresh (retryable for
    ///   5xx, see [`Error::is_retryable`])
    /// - validation errors of the refreshed grant
    pub async fn ensure_freshness(&self, grant: &mut Grant) -> Result<()> {
        if !grant.is_expired() {
            return Ok(());
        }

        let refresh_token = match &grant.refresh_token {
            None => return Err(Error::RefreshTokenMissing),
            Some(token) if token.is_expired() => return Err(Error::RefreshTokenExpired),
            Some(token) => token.raw().to_string(),
        };

        debug!(realm_url = %self.realm_url, "Access token expired, refreshing grant");
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];
        let body = self.post_form(TOKEN_PATH, &params, None).await?;
        let refreshed = self.create_grant_boxed(&body).await?;
        grant.update(refreshed);
        Ok(())
    }

    /// Build and validate a grant from a raw token endpoint body
    ///
    /// Refreshable grants go through [`GrantManager::ensure_freshness`]
    /// first; every grant then goes through
    /// [`GrantManager::validate_grant`] and, when a store is attached, its
    /// [`GrantStore::wrap`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidResponse`] / [`Error::Parse`] for an unusable body,
    /// otherwise the errors of `ensure_freshness` and `validate_grant`.
    pub async fn create_grant(&self, raw: &str) -> Result<Grant> {
        let mut grant = Grant::from_json(raw, self.client_id.as_deref())?;
        if self.is_grant_refreshable(&grant) {
            self.ensure_freshness(&mut grant).await?;
        }
        self.validate_grant(&mut grant).await?;
        if let Some(store) = &self.store {
            store.wrap(&mut grant);
        }
        Ok(grant)
    }

    // ensure_freshness -> create_grant -> ensure_freshness needs a boxed future
    fn create_grant_boxed<'a>(&'a self, raw: &'a str) -> GrantFuture<'a> {
        Box::pin(self.create_grant(raw))
    }

    /// Validate every token of `grant`, replacing them with their validated
    /// forms
    ///
    /// The access token is always checked; the id token too unless the
    /// client is bearer-only. Both checks run concurrently.
    ///
    /// # Errors
    ///
    /// [`Error::GrantValidation`] wrapping the first token failure.
    pub async fn validate_grant(&self, grant: &mut Grant) -> Result<()> {
        let check_id_token = !self.bearer_only && grant.id_token.is_some();

        let access = self.validate_token(grant.access_token.as_ref(), TokenType::Bearer);
        let id = async {
            if check_id_token {
                self.validate_token(grant.id_token.as_ref(), TokenType::Id)
                    .await
                    .map(Some)
            } else {
                Ok(None)
            }
        };

        let (access, id) = tokio::try_join!(access, id).map_err(|e| {
            if e.is_token_rejection() {
                debug!(error = %e, realm_url = %self.realm_url, "Grant rejected");
            } else {
                warn!(error = %e, realm_url = %self.realm_url, "Grant validation failed");
            }
            Error::grant_validation(e)
        })?;

        grant.access_token = Some(access);
        if let Some(id) = id {
            grant.id_token = Some(id);
        }
        Ok(())
    }

    /// Validate one token
    ///
    /// Checks run in a fixed order and the first failure wins: presence,
    /// expiry, signature presence, `typ`, staleness against the revocation
    /// watermark, issuer, audience/authorized party, cryptographic
    /// signature.
    ///
    /// # Errors
    ///
    /// One of the `invalid token (...)` errors, or a key resolution error
    /// ([`Error::KeyNotFound`], [`Error::KeyFetchFailed`]).
    pub async fn validate_token(
        &self,
        token: Option<&Token>,
        expected: TokenType,
    ) -> Result<Token> {
        let token = token.ok_or(Error::TokenMissing)?;
        if token.is_expired() {
            return Err(Error::TokenExpired);
        }
        if !token.is_signed() {
            return Err(Error::TokenNotSigned);
        }

        let claims = token.claims();
        if claims.typ.as_deref() != Some(expected.as_str()) {
            return Err(Error::TokenWrongType {
                expected: expected.to_string(),
                actual: claims.typ.clone(),
            });
        }
        match claims.iat {
            Some(iat) if iat >= self.not_before() => {}
            _ => return Err(Error::TokenStale),
        }
        if claims.iss.as_deref() != Some(self.realm_url.as_str()) {
            return Err(Error::TokenWrongIssuer);
        }

        let audience_matches = self.client_id.as_deref().is_some_and(|client_id| {
            claims
                .aud
                .as_ref()
                .is_some_and(|aud| aud.contains(client_id))
        });
        match expected {
            TokenType::Id => {
                if !audience_matches {
                    return Err(Error::TokenWrongAudience);
                }
                if claims.azp.as_deref() != self.client_id.as_deref() {
                    return Err(Error::TokenWrongAuthorizedParty);
                }
            }
            TokenType::Bearer => {
                if self.verify_token_audience && !audience_matches {
                    return Err(Error::TokenWrongAudience);
                }
            }
        }

        self.signature.verify(token).await?;
        Ok(token.clone())
    }

    /// Whether `grant` can be refreshed by this client
    pub fn is_grant_refreshable(&self, grant: &Grant) -> bool {
        !self.bearer_only && grant.refresh_token.is_some()
    }

    /// Fetch the userinfo claims for an access token
    ///
    /// # Errors
    ///
    /// [`Error::Http`] for a non-success status and
    /// [`Error::InvalidResponse`] when the body carries an `error`.
    pub async fn user_info(&self, access_token: &str) -> Result<UserInfo> {
        let url = format!("{}{USERINFO_PATH}", self.realm_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .header(http::header::ACCEPT, "application/json")
            .header("X-Client", crate::CLIENT_HEADER)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }

        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| Error::InvalidResponse(e.to_string()))?;
        if value.get("error").is_some() {
            return Err(Error::InvalidResponse(body));
        }
        serde_json::from_value(value).map_err(|e| Error::InvalidResponse(e.to_string()))
    }

    /// Ask the realm whether `access_token` is still active
    ///
    /// `Ok(false)` is a normal answer for revoked or expired tokens.
    ///
    /// # Errors
    ///
    /// Only when introspection itself fails.
    pub async fn validate_access_token(&self, access_token: &str) -> Result<bool> {
        self.introspection.is_token_active(access_token).await
    }

    /// POST a form to a realm endpoint and return the raw success body
    async fn post_form(
        &self,
        path: &str,
        params: &[(&str, &str)],
        bearer: Option<&str>,
    ) -> Result<String> {
        let url = format!("{}{path}", self.realm_url);

        let mut form = params.to_vec();
        if let Some(client_id) = &self.client_id {
            form.push(("client_id", client_id.as_str()));
        }

        let mut request = self
            .http
            .post(&url)
            .header("X-Client", crate::CLIENT_HEADER)
            .form(&form);
        if !self.public_client
            && let Some(client_id) = &self.client_id
        {
            request = request.basic_auth(
                client_id,
                self.secret.as_ref().map(|s| s.expose_secret().as_str()),
            );
        } else if let Some(bearer) = bearer {
            request = request.bearer_auth(bearer);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(url = %url, status = %status, "Realm endpoint rejected request");
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}
