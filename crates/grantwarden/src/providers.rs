//! Role and permission queries over verified token claims
//!
//! Role specs are `role` (application role of the configured app),
//! `realm:role` or `app:role`. Permission strings are `resource#scope`.

use std::collections::{BTreeMap, BTreeSet};

use crate::token::{Permission, TokenClaims};

const REALM_KEY: &str = "realm";

/// Role lookups
pub trait RolesProvider {
    fn has_role(&self, spec: &str) -> bool;

    /// All roles, prefixed with their app (or `realm:`) unless they belong to
    /// the configured app
    fn roles(&self) -> Vec<String>;
}

/// Permission lookups
pub trait PermissionsProvider {
    /// `resource#scope`, or a bare resource that was granted
    fn has_permission(&self, permission: &str) -> bool;

    fn has_resource_permission(&self, resource: &str, scope: &str) -> bool;

    /// Every granted `resource#scope`
    fn permissions(&self) -> Vec<String>;

    /// Granted scopes of `resource`
    fn resource_permissions(&self, resource: &str) -> Vec<String>;
}

/// [`RolesProvider`] over `realm_access` / `resource_access`
///
/// With `app` set to `realm`, bare roles are realm roles.
#[derive(Debug, Clone)]
pub struct ClaimsRolesProvider<'a> {
    claims: &'a TokenClaims,
    app: Option<String>,
}

impl<'a> ClaimsRolesProvider<'a> {
    pub fn new(claims: &'a TokenClaims, app: Option<&str>) -> Self {
        Self {
            claims,
            app: app.map(str::to_string),
        }
    }

    fn has_role_in(&self, role: &str, app: Option<&str>) -> bool {
        match app {
            Some(REALM_KEY) => self
                .claims
                .realm_access
                .as_ref()
                .is_some_and(|access| access.roles.iter().any(|r| r == role)),
            Some(app) => self
                .claims
                .resource_access
                .as_ref()
                .and_then(|access| access.get(app))
                .is_some_and(|access| access.roles.iter().any(|r| r == role)),
            None => false,
        }
    }

    fn qualify(&self, app: &str, role: &str) -> String {
        if self.app.as_deref() == Some(app) {
            role.to_string()
        } else {
            format!("{app}:{role}")
        }
    }
}

impl RolesProvider for ClaimsRolesProvider<'_> {
    fn has_role(&self, spec: &str) -> bool {
        match spec.split_once(':') {
            Some((app, role)) => self.has_role_in(role, Some(app)),
            None => self.has_role_in(spec, self.app.as_deref()),
        }
    }

    fn roles(&self) -> Vec<String> {
        let mut roles = Vec::new();
        if let Some(realm) = &self.claims.realm_access {
            roles.extend(realm.roles.iter().map(|r| self.qualify(REALM_KEY, r)));
        }
        if let Some(resources) = &self.claims.resource_access {
            // Sorted for a stable listing
            let apps: BTreeMap<_, _> = resources.iter().collect();
            for (app, access) in apps {
                roles.extend(access.roles.iter().map(|r| self.qualify(app, r)));
            }
        }
        roles
    }
}

/// [`PermissionsProvider`] over `authorization.permissions`
#[derive(Debug, Clone, Default)]
pub struct ClaimsPermissionsProvider {
    permissions: BTreeSet<String>,
    resources: BTreeMap<String, BTreeSet<String>>,
}

impl ClaimsPermissionsProvider {
    pub fn new(claims: &TokenClaims) -> Self {
        let granted = claims
            .authorization
            .as_ref()
            .map(|a| a.permissions.as_slice())
            .unwrap_or_default();
        Self::from_permissions(granted)
    }

    pub fn from_permissions(granted: &[Permission]) -> Self {
        let mut provider = Self::default();
        for permission in granted {
            let Some(resource) = permission.rsname.as_ref().or(permission.rsid.as_ref()) else {
                continue;
            };
            let scopes = provider.resources.entry(resource.clone()).or_default();
            for scope in permission.scopes.iter().flatten() {
                provider.permissions.insert(format!("{resource}#{scope}"));
                scopes.insert(scope.clone());
            }
        }
        provider
    }
}

impl PermissionsProvider for ClaimsPermissionsProvider {
    fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission) || self.resources.contains_key(permission)
    }

    fn has_resource_permission(&self, resource: &str, scope: &str) -> bool {
        self.resources
            .get(resource)
            .is_some_and(|scopes| scopes.contains(scope))
    }

    fn permissions(&self) -> Vec<String> {
        self.permissions.iter().cloned().collect()
    }

    fn resource_permissions(&self, resource: &str) -> Vec<String> {
        self.resources
            .get(resource)
            .map(|scopes| scopes.iter().cloned().collect())
            .unwrap_or_default()
    }
}
