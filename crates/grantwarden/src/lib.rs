//! # Grantwarden - OpenID Connect client adapter
//!
//! Obtains, validates, refreshes and revokes grants issued by a
//! Keycloak-style identity provider, and answers role and permission
//! queries from verified tokens.
//!
//! ## Architecture
//!
//! - [`token`] - JWT parsing, expiry and role/permission predicates
//! - [`grant`] - Access, refresh and id tokens obtained together
//! - [`trust`] - Issuer allow/deny evaluation
//! - [`keys`] - Per-issuer signing key cache with single-flight refresh
//! - [`signature`] - Signature verification against a static or fetched key
//! - [`manager`] - [`GrantManager`], the grant lifecycle and UMA checks
//! - [`admin`] - Realm admin callbacks (logout, not-before)
//! - [`store`] - Grant store contract and built-in stores
//! - [`providers`] - Role and permission providers over token claims
//! - [`metadata`], [`key_provider`], [`direct_grant`] - Discovery based
//!   helpers for tokens of any trusted issuer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use grantwarden::{AdapterConfig, GrantManager};
//!
//! # async fn run() -> grantwarden::Result<()> {
//! let config = AdapterConfig::new("https://sso.example.com", "acme", "web")
//!     .with_secret("s3cret");
//! let manager = GrantManager::new(&config)?;
//!
//! let mut grant = manager.obtain_directly("alice", "password", None).await?;
//! if grant
//!     .access_token
//!     .as_ref()
//!     .is_some_and(|t| t.has_role("realm:admin"))
//! {
//!     println!("admin");
//! }
//!
//! // Later: refresh when the access token has expired
//! manager.ensure_freshness(&mut grant).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! Everything is reported through `tracing`; the host installs the
//! subscriber. Secrets and raw tokens are never logged.

pub mod admin;
pub mod config;
pub mod direct_grant;
pub mod error;
pub mod grant;
pub mod introspection;
pub mod key_provider;
pub mod keys;
pub mod manager;
pub mod metadata;
pub mod providers;
pub mod signature;
pub mod store;
pub mod token;
pub mod trust;

#[cfg(test)]
mod testing;

/// Value of the `X-Client` header on every request to the realm
pub const CLIENT_HEADER: &str = concat!("grantwarden/", env!("CARGO_PKG_VERSION"));

#[doc(inline)]
pub use admin::{AdminHandler, AdminOutcome};
#[doc(inline)]
pub use config::AdapterConfig;
#[doc(inline)]
pub use direct_grant::{DirectGrant, DirectGrantOptions};
#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use grant::{Grant, TokenResponse};
#[doc(inline)]
pub use introspection::{IntrospectionClient, IntrospectionResponse};
#[doc(inline)]
pub use key_provider::KeyProvider;
#[doc(inline)]
pub use keys::{JwksSource, KeyStore};
#[doc(inline)]
pub use manager::{
    AuthzRequest, GrantManager, PermissionCheck, ResourcePermission, ResponseMode, TokenType,
    UserInfo,
};
#[doc(inline)]
pub use metadata::{MetadataOptions, MetadataService, ProviderMetadata};
#[doc(inline)]
pub use providers::{
    ClaimsPermissionsProvider, ClaimsRolesProvider, PermissionsProvider, RolesProvider,
};
#[doc(inline)]
pub use signature::{KeyFamily, PublicKey, Signature};
#[doc(inline)]
pub use store::{BearerStore, GrantStore, MemorySessionStore, RequestParts};
#[doc(inline)]
pub use token::{Token, TokenClaims};
#[doc(inline)]
pub use trust::{IssuerSpec, IssuerTrust, TrustDecision};
