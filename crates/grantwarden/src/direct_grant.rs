//! Resource-owner password grant against any OpenID provider
//!
//! The token endpoint is discovered from the provider metadata. Tokens are
//! returned as issued, without validation.

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::grant::TokenResponse;
use crate::metadata::{MetadataOptions, MetadataService};

#[derive(Clone, Default)]
pub struct DirectGrantOptions {
    pub metadata: MetadataOptions,
    pub client_id: String,
    pub client_secret: Option<SecretString>,
    pub scope: Option<String>,
}

impl std::fmt::Debug for DirectGrantOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectGrantOptions")
            .field("metadata", &self.metadata)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Debug)]
pub struct DirectGrant {
    client_id: String,
    client_secret: Option<SecretString>,
    scope: Option<String>,
    metadata: MetadataService,
    http: reqwest::Client,
}

impl DirectGrant {
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the options name no metadata location.
    pub fn new(options: DirectGrantOptions) -> Result<Self> {
        Self::with_client(options, reqwest::Client::new())
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] when the options name no metadata location.
    pub fn with_client(options: DirectGrantOptions, http: reqwest::Client) -> Result<Self> {
        Ok(Self {
            metadata: MetadataService::with_client(options.metadata, http.clone())?,
            client_id: options.client_id,
            client_secret: options.client_secret,
            scope: options.scope,
            http,
        })
    }

    /// Exchange user credentials for tokens
    ///
    /// # Errors
    ///
    /// - [`Error::Metadata`] when the token endpoint cannot be discovered
    /// - [`Error::Http`] when the provider refuses the credentials
    /// - [`Error::InvalidResponse`] for an error or malformed body
    pub async fn password(&self, username: &str, password: &str) -> Result<TokenResponse> {
        let token_endpoint = self.metadata.token_endpoint().await?;

        let mut form = vec![
            ("grant_type", "password"),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.expose_secret().as_str()));
        }
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }
        form.push(("username", username));
        form.push(("password", password));

        let response = self.http.post(&token_endpoint).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(endpoint = %token_endpoint, status = %status, "Password grant refused");
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }

        debug!(endpoint = %token_endpoint, "Password grant issued");
        TokenResponse::from_json(&body)
    }
}
