//! OpenID Connect discovery
//!
//! [`MetadataService`] fetches `{authority}/.well-known/openid-configuration`
//! (or an explicit metadata URL) once and memoizes the document. A failed
//! fetch is not memoized; the next call tries again.

use std::collections::HashMap;

use jsonwebtoken::jwk::JwkSet;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::keys::source::fetch_jwk_set;

/// Where to find the provider metadata
#[derive(Debug, Clone, Default)]
pub struct MetadataOptions {
    /// Issuer URL; the document is looked up under `/.well-known`
    pub authority: Option<String>,
    /// Explicit document URL, takes precedence over `authority`
    pub metadata_url: Option<String>,
}

impl MetadataOptions {
    pub fn authority(authority: impl Into<String>) -> Self {
        Self {
            authority: Some(authority.into()),
            metadata_url: None,
        }
    }

    pub fn metadata_url(url: impl Into<String>) -> Self {
        Self {
            authority: None,
            metadata_url: Some(url.into()),
        }
    }
}

/// Provider metadata (OpenID Connect Discovery 1.0 §3)
///
/// Only the endpoints the adapter uses are typed; the rest stays in `extra`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub introspection_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Lazily fetched, memoized provider metadata
pub struct MetadataService {
    metadata_url: String,
    http: reqwest::Client,
    metadata: OnceCell<ProviderMetadata>,
}

impl std::fmt::Debug for MetadataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataService")
            .field("metadata_url", &self.metadata_url)
            .field("metadata", &self.metadata.get().map(|_| "<cached>"))
            .finish()
    }
}

impl MetadataService {
    /// Create a service with its own HTTP client
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when neither an authority nor a metadata
    /// URL is given.
    pub fn new(options: MetadataOptions) -> Result<Self> {
        Self::with_client(options, reqwest::Client::new())
    }

    /// Create a service sharing an existing HTTP client
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when neither an authority nor a metadata
    /// URL is given.
    pub fn with_client(options: MetadataOptions, http: reqwest::Client) -> Result<Self> {
        let metadata_url = match (options.metadata_url, options.authority) {
            (Some(url), _) => url,
            (None, Some(authority)) => format!(
                "{}/.well-known/openid-configuration",
                authority.trim_end_matches('/')
            ),
            (None, None) => {
                return Err(Error::Config(
                    "metadata requires an authority or a metadata URL".to_string(),
                ));
            }
        };

        Ok(Self {
            metadata_url,
            http,
            metadata: OnceCell::new(),
        })
    }

    pub fn metadata_url(&self) -> &str {
        &self.metadata_url
    }

    /// The provider metadata, fetched on first use
    ///
    /// # Errors
    ///
    /// Returns [`Error::Metadata`] when the document cannot be fetched or
    /// parsed.
    pub async fn metadata(&self) -> Result<&ProviderMetadata> {
        self.metadata.get_or_try_init(|| self.fetch()).await
    }

    async fn fetch(&self) -> Result<ProviderMetadata> {
        debug!(metadata_url = %self.metadata_url, "Fetching OIDC discovery document");

        let response = self.http.get(&self.metadata_url).send().await.map_err(|e| {
            warn!(metadata_url = %self.metadata_url, error = %e, "Discovery request failed");
            Error::Metadata(format!("{}: {e}", self.metadata_url))
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(metadata_url = %self.metadata_url, status = %status, "Discovery endpoint returned error status");
            return Err(Error::Metadata(format!(
                "{} returned status {status}",
                self.metadata_url
            )));
        }

        let metadata: ProviderMetadata = response
            .json()
            .await
            .map_err(|e| Error::Metadata(format!("invalid discovery document: {e}")))?;

        info!(
            metadata_url = %self.metadata_url,
            issuer = ?metadata.issuer,
            "Loaded OIDC discovery document"
        );
        Ok(metadata)
    }

    async fn endpoint(
        &self,
        name: &str,
        pick: impl FnOnce(&ProviderMetadata) -> Option<&String>,
    ) -> Result<String> {
        let metadata = self.metadata().await?;
        pick(metadata)
            .cloned()
            .ok_or_else(|| Error::Metadata(format!("{name} is not advertised")))
    }

    /// # Errors
    ///
    /// Returns [`Error::Metadata`] when discovery fails or the endpoint is
    /// not advertised.
    pub async fn token_endpoint(&self) -> Result<String> {
        self.endpoint("token_endpoint", |m| m.token_endpoint.as_ref())
            .await
    }

    /// # Errors
    ///
    /// Returns [`Error::Metadata`] when discovery fails or the endpoint is
    /// not advertised.
    pub async fn authorization_endpoint(&self) -> Result<String> {
        self.endpoint("authorization_endpoint", |m| {
            m.authorization_endpoint.as_ref()
        })
        .await
    }

    /// # Errors
    ///
    /// Returns [`Error::Metadata`] when discovery fails or the endpoint is
    /// not advertised.
    pub async fn userinfo_endpoint(&self) -> Result<String> {
        self.endpoint("userinfo_endpoint", |m| m.userinfo_endpoint.as_ref())
            .await
    }

    /// # Errors
    ///
    /// Returns [`Error::Metadata`] when discovery fails or no `jwks_uri` is
    /// advertised.
    pub async fn jwks_uri(&self) -> Result<String> {
        self.endpoint("jwks_uri", |m| m.jwks_uri.as_ref()).await
    }

    /// The provider's current signing keys
    ///
    /// Not cached here; [`crate::keys::KeyStore`] owns key caching.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Metadata`] when discovery fails and
    /// [`Error::KeyFetchFailed`] when the key set cannot be downloaded.
    pub async fn signing_keys(&self) -> Result<JwkSet> {
        let jwks_uri = self.jwks_uri().await?;
        fetch_jwk_set(&self.http, &jwks_uri).await
    }
}
