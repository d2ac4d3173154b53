//! Signing key acquisition
//!
//! - [`KeyStore`]: per-issuer cache with rate-limited, single-flight refresh
//! - [`JwksSource`]: where key sets are downloaded from
//! - [`jwk_to_pem`]: JWK to PEM conversion

pub mod pem;
pub mod source;
pub mod store;

pub use pem::jwk_to_pem;
pub use source::{DiscoveryJwksSource, JwksSource, RealmCertsSource};
pub use store::KeyStore;
