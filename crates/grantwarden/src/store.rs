//! Grant stores
//!
//! Where the host application keeps grants between requests. A store hands
//! back the raw grant JSON for a request; the [`GrantManager`] turns it into
//! a validated [`Grant`].
//!
//! [`GrantManager`]: crate::GrantManager

use async_trait::async_trait;
use dashmap::DashMap;
use http::HeaderMap;
use http::header::AUTHORIZATION;
use tracing::debug;

use crate::error::Result;
use crate::grant::Grant;

/// The parts of an incoming request a store may look at
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    pub headers: &'a HeaderMap,
    pub session_id: Option<&'a str>,
}

impl<'a> RequestParts<'a> {
    pub fn new(headers: &'a HeaderMap) -> Self {
        Self {
            headers,
            session_id: None,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session_id: &'a str) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Persistence contract for grants
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Raw grant JSON for the request, if any
    fn get(&self, request: &RequestParts<'_>) -> Option<String>;

    /// Forget the grant of a session (admin logout)
    async fn clear(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }

    /// Attach store-specific state to a freshly created grant
    fn wrap(&self, _grant: &mut Grant) {}
}

/// Reads the access token from the `Authorization: Bearer` header
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerStore;

#[async_trait]
impl GrantStore for BearerStore {
    fn get(&self, request: &RequestParts<'_>) -> Option<String> {
        let header = request.headers.get(AUTHORIZATION)?.to_str().ok()?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))?;
        Some(serde_json::json!({ "access_token": token }).to_string())
    }
}

/// In-process session store keyed by session id
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    grants: DashMap<String, String>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the raw payload of `grant` for `session_id`
    pub fn store(&self, session_id: &str, grant: &Grant) {
        if let Some(raw) = grant.raw() {
            self.grants.insert(session_id.to_string(), raw.to_string());
        }
    }

    pub fn unstore(&self, session_id: &str) {
        self.grants.remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[async_trait]
impl GrantStore for MemorySessionStore {
    fn get(&self, request: &RequestParts<'_>) -> Option<String> {
        let session_id = request.session_id?;
        self.grants.get(session_id).map(|raw| raw.value().clone())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        if self.grants.remove(session_id).is_some() {
            debug!(session_id, "Session grant cleared");
        }
        Ok(())
    }
}
