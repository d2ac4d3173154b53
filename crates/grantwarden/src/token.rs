//! Compact JWT parsing and claim predicates
//!
//! A [`Token`] is a decoded, *unverified* view over a raw JWT. Trust is
//! established separately by [`crate::manager::GrantManager::validate_token`];
//! nothing here touches keys.
//!
//! Parsing is strict: a string that does not decode into a header and claim
//! set is a [`Error::Parse`], never an empty token that silently reads as
//! "does not expire".

use std::collections::HashMap;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// base64url, accepting input with or without `=` padding
const BASE64_URL_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// JOSE header
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenHeader {
    /// Signing algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Key id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Media type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    /// Any other header parameters
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// `aud` claim, a single audience or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// `"aud": "client"`
    One(String),
    /// `"aud": ["a", "b"]`
    Many(Vec<String>),
}

impl Audience {
    /// Whether `client_id` is one of the audiences
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Self::One(aud) => aud == client_id,
            Self::Many(auds) => auds.iter().any(|a| a == client_id),
        }
    }
}

/// Role list under `realm_access` or a `resource_access` entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleClaim {
    /// Role names
    #[serde(default)]
    pub roles: Vec<String>,
}

/// One entry of `authorization.permissions`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Resource id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsid: Option<String>,
    /// Resource name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsname: Option<String>,
    /// Granted scopes; absent means the whole resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

impl Permission {
    /// Whether this permission names `resource` by id or by name
    pub fn matches_resource(&self, resource: &str) -> bool {
        self.rsid.as_deref() == Some(resource) || self.rsname.as_deref() == Some(resource)
    }
}

/// `authorization` claim of RPT tokens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationClaim {
    /// Granted permissions
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Claim set of a token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,
    /// Expiry, seconds since the epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued-at, seconds since the epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Token type as stamped by the IdP (`Bearer`, `ID`, `Refresh`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm_access: Option<RoleClaim>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_access: Option<HashMap<String, RoleClaim>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthorizationClaim>,
    /// Admin callback action (`LOGOUT`, `PUSH_NOT_BEFORE`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Revocation watermark carried by admin callbacks
    #[serde(
        default,
        rename = "notBefore",
        skip_serializing_if = "Option::is_none"
    )]
    pub not_before: Option<i64>,
    /// Sessions targeted by an admin logout
    #[serde(
        default,
        rename = "adapterSessionIds",
        skip_serializing_if = "Option::is_none"
    )]
    pub adapter_session_ids: Option<Vec<String>>,
    /// Everything else
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A decoded compact JWT
#[derive(Clone)]
pub struct Token {
    raw: String,
    header: TokenHeader,
    claims: TokenClaims,
    signature: Vec<u8>,
    signed_input: String,
    client_id: Option<String>,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("raw", &"[REDACTED]")
            .field("header", &self.header)
            .field("iss", &self.claims.iss)
            .field("sub", &self.claims.sub)
            .field("typ", &self.claims.typ)
            .field("exp", &self.claims.exp)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str, what: &str) -> Result<T> {
    let bytes = BASE64_URL_LENIENT
        .decode(segment)
        .map_err(|e| Error::Parse(format!("{what} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Parse(format!("{what} is not JSON: {e}")))
}

impl Token {
    /// Decode `raw` without verifying it
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] unless `raw` has exactly three segments, the
    /// first two being base64url JSON objects.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let mut parts = raw.split('.');
        let (Some(header), Some(claims), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Parse("expected three dot-separated segments".to_string()));
        };

        let signature = BASE64_URL_LENIENT
            .decode(signature)
            .map_err(|e| Error::Parse(format!("signature is not base64url: {e}")))?;

        Ok(Self {
            raw: raw.to_string(),
            header: decode_segment(header, "header")?,
            claims: decode_segment(claims, "claims")?,
            signature,
            signed_input: format!("{header}.{claims}"),
            client_id: None,
        })
    }

    /// Bind the client id used to resolve bare role names
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// The token exactly as received
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    /// Decoded signature bytes
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// `header.claims`, the bytes covered by the signature
    pub fn signed_input(&self) -> &str {
        &self.signed_input
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn kid(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    pub fn issuer(&self) -> Option<&str> {
        self.claims.iss.as_deref()
    }

    /// Whether the token carries a signature at all
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Whether `exp` lies in the past; tokens without `exp` never expire
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// [`Token::is_expired`] against an explicit clock
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.claims.exp {
            None => false,
            Some(exp) => exp.saturating_mul(1000) < now.timestamp_millis(),
        }
    }

    /// Test a role spec
    ///
    /// - `role` is an application role of the bound client id
    /// - `realm:role` is a realm role
    /// - `app:role` is an application role of `app`
    ///
    /// Only the first `:` separates the prefix, so `app:ns:role` asks `app`
    /// for the role `ns:role`; colons inside role names survive. A bare role
    /// is never granted when no client id is bound.
    pub fn has_role(&self, spec: &str) -> bool {
        match spec.split_once(':') {
            None => self
                .client_id
                .as_deref()
                .is_some_and(|client_id| self.has_application_role(client_id, spec)),
            Some(("realm", role)) => self.has_realm_role(role),
            Some((app, role)) => self.has_application_role(app, role),
        }
    }

    /// Whether `resource_access[app].roles` contains `role`
    pub fn has_application_role(&self, app: &str, role: &str) -> bool {
        self.claims
            .resource_access
            .as_ref()
            .and_then(|access| access.get(app))
            .is_some_and(|claim| claim.roles.iter().any(|r| r == role))
    }

    /// Whether `realm_access.roles` contains `role`
    pub fn has_realm_role(&self, role: &str) -> bool {
        self.claims
            .realm_access
            .as_ref()
            .is_some_and(|claim| claim.roles.iter().any(|r| r == role))
    }

    /// Whether `authorization.permissions` grants `resource` (and `scope`)
    ///
    /// The first permission naming the resource decides. A permission without
    /// scopes grants every scope of its resource.
    pub fn has_permission(&self, resource: &str, scope: Option<&str>) -> bool {
        let Some(authorization) = self.claims.authorization.as_ref() else {
            return false;
        };

        authorization
            .permissions
            .iter()
            .find(|p| p.matches_resource(resource))
            .is_some_and(|p| match (scope, p.scopes.as_deref()) {
                (Some(scope), Some(scopes)) if !scopes.is_empty() => {
                    scopes.iter().any(|s| s == scope)
                }
                _ => true,
            })
    }
}
