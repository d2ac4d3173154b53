//! Admin callbacks from the realm
//!
//! The realm pushes signed tokens to the application to log sessions out or
//! to move the revocation watermark. The signature is verified before any
//! claim of the payload is used.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::manager::GrantManager;
use crate::store::GrantStore;
use crate::token::Token;

pub const ACTION_LOGOUT: &str = "LOGOUT";
pub const ACTION_PUSH_NOT_BEFORE: &str = "PUSH_NOT_BEFORE";

/// How an admin callback was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminOutcome {
    /// Applied
    Ok,
    /// Verified, but not an action this endpoint handles
    Rejected,
    /// The body is not a token (400)
    BadRequest(String),
    /// The token is not signed by the realm (401)
    Unauthorized(String),
}

impl AdminOutcome {
    /// HTTP status the host should answer with
    pub fn status(&self) -> http::StatusCode {
        match self {
            Self::Ok => http::StatusCode::OK,
            Self::Rejected | Self::BadRequest(_) => http::StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => http::StatusCode::UNAUTHORIZED,
        }
    }
}

/// Applies realm admin callbacks to a [`GrantManager`]
#[derive(Clone)]
pub struct AdminHandler {
    manager: Arc<GrantManager>,
    store: Option<Arc<dyn GrantStore>>,
}

impl std::fmt::Debug for AdminHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminHandler")
            .field("manager", &self.manager)
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl AdminHandler {
    pub fn new(manager: Arc<GrantManager>) -> Self {
        Self {
            manager,
            store: None,
        }
    }

    /// Session store cleared on targeted logouts
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn GrantStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// `k_logout` callback
    pub async fn handle_logout(&self, body: &str) -> AdminOutcome {
        let token = match self.verified(body).await {
            Ok(token) => token,
            Err(outcome) => return outcome,
        };
        let claims = token.claims();
        if claims.action.as_deref() != Some(ACTION_LOGOUT) {
            return AdminOutcome::Rejected;
        }

        match claims.adapter_session_ids.as_deref() {
            Some([]) => debug!("Logout callback with an empty session list"),
            Some(ids) => {
                let Some(store) = &self.store else {
                    warn!(sessions = ids.len(), "Logout for sessions without a grant store");
                    return AdminOutcome::Ok;
                };
                for id in ids {
                    if let Err(e) = store.clear(id).await {
                        warn!(session_id = %id, error = %e, "Failed to clear session grant");
                    }
                }
                info!(sessions = ids.len(), "Sessions logged out");
            }
            None => {
                if let Some(not_before) = claims.not_before {
                    self.manager.set_not_before(not_before);
                }
            }
        }
        AdminOutcome::Ok
    }

    /// `k_push_not_before` callback
    pub async fn handle_push_not_before(&self, body: &str) -> AdminOutcome {
        let token = match self.verified(body).await {
            Ok(token) => token,
            Err(outcome) => return outcome,
        };
        let claims = token.claims();
        if claims.action.as_deref() != Some(ACTION_PUSH_NOT_BEFORE) {
            return AdminOutcome::Rejected;
        }
        if let Some(not_before) = claims.not_before {
            self.manager.set_not_before(not_before);
        }
        AdminOutcome::Ok
    }

    async fn verified(&self, body: &str) -> Result<Token, AdminOutcome> {
        let token = Token::parse(body.trim()).map_err(|e| AdminOutcome::BadRequest(e.to_string()))?;
        self.manager.signature().verify(&token).await.map_err(|e| {
            warn!(error = %e, "Admin callback with an unverifiable signature");
            AdminOutcome::Unauthorized(e.to_string())
        })?;
        Ok(token)
    }
}
