//! Where signing keys come from

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::metadata::{MetadataOptions, MetadataService};

/// Fetches the current key set of an issuer
#[async_trait]
pub trait JwksSource: Send + Sync + std::fmt::Debug {
    /// Download every key the issuer currently publishes
    async fn fetch_keys(&self, issuer: &str) -> Result<JwkSet>;
}

/// Download and parse a JWKS document
///
/// Keys that do not parse (unknown `kty`, missing members) are skipped with
/// a warning instead of failing the whole set.
pub(crate) async fn fetch_jwk_set(http: &reqwest::Client, url: &str) -> Result<JwkSet> {
    debug!(jwks_uri = %url, "Fetching JWKS");

    let response = http.get(url).send().await.map_err(|e| {
        error!(jwks_uri = %url, error = %e, "Failed to fetch JWKS");
        Error::KeyFetchFailed(format!("JWKS fetch failed: {e}"))
    })?;

    let status = response.status();
    if !status.is_success() {
        error!(jwks_uri = %url, status = %status, "JWKS endpoint returned error status");
        return Err(Error::KeyFetchFailed(format!(
            "JWKS endpoint returned status {status}"
        )));
    }

    let body: serde_json::Value = response.json().await.map_err(|e| {
        error!(jwks_uri = %url, error = %e, "Failed to parse JWKS JSON");
        Error::KeyFetchFailed(format!("Invalid JWKS format: {e}"))
    })?;

    if let Some(err) = body.get("error") {
        return Err(Error::KeyFetchFailed(format!("JWKS endpoint reported {err}")));
    }

    let Some(entries) = body.get("keys").and_then(serde_json::Value::as_array) else {
        return Err(Error::KeyFetchFailed("JWKS document has no keys array".to_string()));
    };

    let keys = entries
        .iter()
        .filter_map(|entry| match serde_json::from_value::<Jwk>(entry.clone()) {
            Ok(jwk) => Some(jwk),
            Err(e) => {
                warn!(
                    jwks_uri = %url,
                    kid = ?entry.get("kid"),
                    error = %e,
                    "Skipping unparseable JWK"
                );
                None
            }
        })
        .collect();

    Ok(JwkSet { keys })
}

/// Keycloak-style realm certificates: `{issuer}/protocol/openid-connect/certs`
#[derive(Debug, Clone)]
pub struct RealmCertsSource {
    http: reqwest::Client,
}

impl RealmCertsSource {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub fn certs_url(issuer: &str) -> String {
        format!(
            "{}/protocol/openid-connect/certs",
            issuer.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl JwksSource for RealmCertsSource {
    async fn fetch_keys(&self, issuer: &str) -> Result<JwkSet> {
        fetch_jwk_set(&self.http, &Self::certs_url(issuer)).await
    }
}

/// Keys located through the issuer's discovery document (`jwks_uri`)
#[derive(Debug, Clone, Default)]
pub struct DiscoveryJwksSource {
    http: reqwest::Client,
    services: Arc<DashMap<String, Arc<MetadataService>>>,
}

impl DiscoveryJwksSource {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            services: Arc::new(DashMap::new()),
        }
    }

    fn service(&self, issuer: &str) -> Result<Arc<MetadataService>> {
        if let Some(service) = self.services.get(issuer) {
            return Ok(Arc::clone(service.value()));
        }
        let service = Arc::new(MetadataService::with_client(
            MetadataOptions::authority(issuer),
            self.http.clone(),
        )?);
        Ok(Arc::clone(
            self.services
                .entry(issuer.to_string())
                .or_insert(service)
                .value(),
        ))
    }
}

#[async_trait]
impl JwksSource for DiscoveryJwksSource {
    async fn fetch_keys(&self, issuer: &str) -> Result<JwkSet> {
        self.service(issuer)?.signing_keys().await
    }
}
