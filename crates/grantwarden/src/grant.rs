//! Grant container
//!
//! A [`Grant`] bundles the tokens returned by a token endpoint together with
//! the raw payload they came from. Grants are owned by the caller;
//! [`crate::manager::GrantManager`] only ever updates one through `&mut`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::token::Token;

/// Token endpoint response body (RFC 6749 §5.1 plus OIDC fields)
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    /// Provider-specific fields
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

// Manual Debug impl to keep tokens out of logs
impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |t: &Option<String>| t.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("TokenResponse")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("id_token", &redact(&self.id_token))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl TokenResponse {
    /// Parse a token endpoint body
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidResponse`] when the body is not a JSON object
    /// or carries an OAuth `error`.
    pub fn from_json(raw: &str) -> Result<Self> {
        let response: Self =
            serde_json::from_str(raw).map_err(|e| Error::InvalidResponse(e.to_string()))?;
        if let Some(error) = &response.error {
            return Err(Error::InvalidResponse(match &response.error_description {
                Some(description) => format!("{error}: {description}"),
                None => error.clone(),
            }));
        }
        Ok(response)
    }
}

/// Access, refresh and id tokens obtained together
#[derive(Debug, Clone, Default)]
pub struct Grant {
    pub access_token: Option<Token>,
    pub refresh_token: Option<Token>,
    pub id_token: Option<Token>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    raw: Option<String>,
}

impl Grant {
    /// Build a grant from a token endpoint body
    ///
    /// `client_id` is bound to the access token so bare role names resolve
    /// against it.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidResponse`] for a malformed body and
    /// [`Error::Parse`] when any of the tokens is not a decodable JWT.
    pub fn from_json(raw: &str, client_id: Option<&str>) -> Result<Self> {
        let response = TokenResponse::from_json(raw)?;
        Self::from_response(&response, raw.to_string(), client_id)
    }

    /// Build a grant from an already parsed response and its raw body
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] when any of the tokens is not a decodable JWT.
    pub fn from_response(
        response: &TokenResponse,
        raw: String,
        client_id: Option<&str>,
    ) -> Result<Self> {
        let access_token = response
            .access_token
            .as_deref()
            .map(|t| {
                Token::parse(t).map(|token| match client_id {
                    Some(id) => token.with_client_id(id),
                    None => token,
                })
            })
            .transpose()?;

        Ok(Self {
            access_token,
            refresh_token: response.refresh_token.as_deref().map(Token::parse).transpose()?,
            id_token: response.id_token.as_deref().map(Token::parse).transpose()?,
            token_type: response.token_type.clone(),
            expires_in: response.expires_in,
            raw: Some(raw),
        })
    }

    /// Replace every field with those of `other`, keeping `self` in place
    pub fn update(&mut self, other: Grant) {
        *self = other;
    }

    /// The verbatim payload this grant was built from, if any
    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    /// Expired when the access token is absent or expired
    ///
    /// An expired grant may still be refreshable through its refresh token.
    pub fn is_expired(&self) -> bool {
        self.access_token.as_ref().is_none_or(Token::is_expired)
    }
}
