//! UMA-ticket permission checks

use serde::Deserialize;
use tracing::debug;

use super::{GrantManager, TOKEN_PATH};
use crate::error::{Error, Result};
use crate::grant::Grant;
use crate::token::Permission;

const UMA_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:uma-ticket";

/// A resource with optional scopes, sent as `resource[#scope,scope...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePermission {
    pub id: String,
    pub scopes: Vec<String>,
}

impl ResourcePermission {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scopes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    /// Parse `resource` or `resource#scope,scope`
    pub fn parse(spec: &str) -> Self {
        match spec.split_once('#') {
            Some((id, scopes)) => Self::new(id).with_scopes(
                scopes
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty()),
            ),
            None => Self::new(spec),
        }
    }

    /// Form value of the `permission` parameter
    pub fn to_param(&self) -> String {
        if self.scopes.is_empty() {
            self.id.clone()
        } else {
            format!("{}#{}", self.id, self.scopes.join(","))
        }
    }
}

/// Body of an authorization request
#[derive(Debug, Clone, Default)]
pub struct AuthzRequest {
    /// Resource server client id; the manager's client id when absent
    pub audience: Option<String>,
    pub claim_token: Option<String>,
    pub claim_token_format: Option<String>,
    pub permissions: Vec<ResourcePermission>,
}

impl AuthzRequest {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn permission(mut self, permission: ResourcePermission) -> Self {
        self.permissions.push(permission);
        self
    }

    #[must_use]
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }
}

/// What the realm should answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// `{ "result": bool }`
    Decision,
    /// The granted permissions
    Permissions,
    /// A requesting party token, returned as a full grant
    #[default]
    Token,
}

impl ResponseMode {
    fn as_param(self) -> Option<&'static str> {
        match self {
            Self::Decision => Some("decision"),
            Self::Permissions => Some("permissions"),
            Self::Token => None,
        }
    }
}

/// Result of [`GrantManager::check_permissions`]
#[derive(Debug, Clone)]
pub enum PermissionCheck {
    Decision(bool),
    Permissions(Vec<Permission>),
    Grant(Grant),
}

#[derive(Deserialize)]
struct Decision {
    #[serde(default)]
    result: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl GrantManager {
    /// Ask the realm for permissions with an UMA-ticket request
    ///
    /// Confidential clients send `bearer` as the `subject_token` and require
    /// it; public clients send it as their `Authorization` header.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingBearer`] for a confidential client without a bearer
    /// - [`Error::Http`] when the realm refuses the request
    /// - [`Error::InvalidResponse`] for an unexpected body
    /// - grant creation errors in [`ResponseMode::Token`]
    pub async fn check_permissions(
        &self,
        request: &AuthzRequest,
        mode: ResponseMode,
        bearer: Option<&str>,
    ) -> Result<PermissionCheck> {
        let audience = request
            .audience
            .as_deref()
            .or(self.client_id.as_deref())
            .ok_or_else(|| Error::Config("UMA request needs an audience or client id".into()))?;
        let permissions: Vec<String> = request
            .permissions
            .iter()
            .map(ResourcePermission::to_param)
            .collect();

        let mut params = vec![("grant_type", UMA_GRANT_TYPE), ("audience", audience)];
        if let Some(mode) = mode.as_param() {
            params.push(("response_mode", mode));
        }
        if let Some(claim_token) = &request.claim_token {
            params.push(("claim_token", claim_token.as_str()));
        }
        if let Some(format) = &request.claim_token_format {
            params.push(("claim_token_format", format.as_str()));
        }
        params.extend(permissions.iter().map(|p| ("permission", p.as_str())));

        let header_bearer = if self.public_client {
            bearer
        } else {
            let bearer = bearer.ok_or(Error::MissingBearer)?;
            params.push(("subject_token", bearer));
            None
        };

        let body = self.post_form(TOKEN_PATH, &params, header_bearer).await?;
        debug!(audience, ?mode, "UMA permission request answered");

        match mode {
            ResponseMode::Decision => {
                let decision: Decision = serde_json::from_str(&body)
                    .map_err(|e| Error::InvalidResponse(format!("decision: {e}")))?;
                Ok(PermissionCheck::Decision(decision.result))
            }
            ResponseMode::Permissions => serde_json::from_str(&body)
                .map(PermissionCheck::Permissions)
                .map_err(|e| Error::InvalidResponse(format!("permissions: {e}"))),
            ResponseMode::Token => self.create_grant(&body).await.map(PermissionCheck::Grant),
        }
    }

    /// Decide one permission for `access_token`
    ///
    /// Denials reported by the realm as `access_denied`/`not_authorized`,
    /// `invalid_resource` or `invalid_scope` are `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Any other failure of [`GrantManager::check_permissions`].
    pub async fn evaluate_permission(
        &self,
        access_token: &str,
        permission: ResourcePermission,
    ) -> Result<bool> {
        let request = AuthzRequest::new().permission(permission);
        match self
            .check_permissions(&request, ResponseMode::Decision, Some(access_token))
            .await
        {
            Ok(PermissionCheck::Decision(result)) => Ok(result),
            Ok(_) => Ok(false),
            Err(Error::Http { status, body }) if is_denial(&body) => {
                debug!(status, "Permission denied by realm");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

fn is_denial(body: &str) -> bool {
    let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) else {
        return false;
    };
    match parsed.error.as_deref() {
        Some("access_denied") => parsed.error_description.as_deref() == Some("not_authorized"),
        Some("invalid_resource" | "invalid_scope") => true,
        _ => false,
    }
}
