//! OAuth 2.0 Token Introspection (RFC 7662)
//!
//! Live validation of an access token against the realm's introspection
//! endpoint. Complements local JWT validation by catching tokens revoked at
//! the identity provider before they expire.
//!
//! An inactive token is a normal answer (`active: false`), not an error.

use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Token introspection response per RFC 7662 Section 2.2
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IntrospectionResponse {
    /// Whether the token is currently active (REQUIRED)
    #[serde(default)]
    pub active: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Expiration timestamp (seconds since epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Issued at timestamp (seconds since epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Additional fields (realm_access, session_state, ...)
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

/// Token introspection client
#[derive(Clone)]
pub struct IntrospectionClient {
    endpoint: String,
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    http_client: reqwest::Client,
}

// Manual Debug impl to prevent client_secret exposure in logs
impl std::fmt::Debug for IntrospectionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntrospectionClient")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl IntrospectionClient {
    /// Create a client for `endpoint`
    ///
    /// `client_secret` is `None` for public clients.
    pub fn new(
        endpoint: impl Into<String>,
        client_id: Option<String>,
        client_secret: Option<SecretString>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_id,
            client_secret,
            http_client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Introspect a token per RFC 7662
    ///
    /// # Errors
    ///
    /// - [`Error::Transport`] when the request fails
    /// - [`Error::Http`] for a non-success status
    /// - [`Error::InvalidResponse`] when the body is not an introspection
    ///   response
    pub async fn introspect(
        &self,
        token: &str,
        token_type_hint: Option<&str>,
    ) -> Result<IntrospectionResponse> {
        let mut form_data = vec![("token", token)];
        if let Some(client_id) = &self.client_id {
            form_data.push(("client_id", client_id.as_str()));
        }
        if let Some(secret) = &self.client_secret {
            form_data.push(("client_secret", secret.expose_secret().as_str()));
        }
        if let Some(hint) = token_type_hint {
            form_data.push(("token_type_hint", hint));
        }

        let mut request = self
            .http_client
            .post(&self.endpoint)
            .header("X-Client", crate::CLIENT_HEADER)
            .form(&form_data);
        if let (Some(client_id), Some(secret)) = (&self.client_id, &self.client_secret) {
            request = request.basic_auth(client_id, Some(secret.expose_secret().as_str()));
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }

        let introspection: IntrospectionResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("introspection response: {e}")))?;

        debug!(
            endpoint = %self.endpoint,
            active = introspection.active,
            "Token introspected"
        );
        Ok(introspection)
    }

    /// Whether the identity provider still considers `token` active
    ///
    /// # Errors
    ///
    /// Same as [`IntrospectionClient::introspect`]; an inactive token is
    /// `Ok(false)`.
    pub async fn is_token_active(&self, token: &str) -> Result<bool> {
        let response = self.introspect(token, Some("access_token")).await?;
        Ok(response.active)
    }
}
