//! Error types for grant acquisition and token trust
//!
//! Token validation failures render the same way the adapter has always
//! reported them (`invalid token (<reason>)`), so log lines and admin
//! responses stay recognizable to operators.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while obtaining, refreshing or validating grants
#[derive(Debug, Error)]
pub enum Error {
    /// The raw string is not a decodable compact JWT
    #[error("malformed token: {0}")]
    Parse(String),

    /// No token was supplied where one is required
    #[error("invalid token (missing)")]
    TokenMissing,

    /// `exp` is in the past
    #[error("invalid token (expired)")]
    TokenExpired,

    /// The token carries no signature segment
    #[error("invalid token (not signed)")]
    TokenNotSigned,

    /// `typ` does not match the expected token type
    #[error("invalid token (wrong type)")]
    TokenWrongType {
        /// Type the caller asked for
        expected: String,
        /// Type found in the claims
        actual: Option<String>,
    },

    /// `iat` is absent or older than the revocation watermark
    #[error("invalid token (stale token)")]
    TokenStale,

    /// `iss` does not match the realm URL
    #[error("invalid token (wrong ISS)")]
    TokenWrongIssuer,

    /// The client id is not among the token audiences
    #[error("invalid token (wrong audience)")]
    TokenWrongAudience,

    /// `azp` does not equal the client id
    #[error("invalid token (authorized party should match client id)")]
    TokenWrongAuthorizedParty,

    /// Verification against the statically configured realm key failed
    #[error("invalid token (signature)")]
    TokenSignatureInvalid,

    /// Verification against a key resolved from the JWKS failed
    #[error("invalid token (public key signature)")]
    PublicKeySignatureInvalid,

    /// The token header has no `kid`
    #[error("invalid token (missing kid)")]
    MissingKid,

    /// The issuer does not publish a key with this id, even after a refetch
    #[error("no signing key with kid={kid} found for authority {issuer}")]
    KeyNotFound {
        /// Issuer whose key set was searched
        issuer: String,
        /// Requested key id
        kid: String,
    },

    /// The key set could not be retrieved
    #[error("failed to load public key to verify token. Reason: {0}")]
    KeyFetchFailed(String),

    /// A JWK could not be turned into a usable public key
    #[error("unusable signing key: {0}")]
    KeyConversion(String),

    /// The token has no `iss` claim
    #[error("Token issuer is not defined")]
    IssuerMissing,

    /// No allow rule matched the issuer
    #[error("Token issuer \"{0}\" is not allowed")]
    IssuerNotAllowed(String),

    /// A deny rule matched the issuer
    #[error("Token issuer \"{0}\" is denied")]
    IssuerDenied(String),

    /// The grant has no refresh token to renew with
    #[error("Unable to refresh without a refresh token")]
    RefreshTokenMissing,

    /// The refresh token itself has expired; the session is over
    #[error("Unable to refresh with expired refresh token")]
    RefreshTokenExpired,

    /// One of the grant's tokens failed validation
    #[error("Grant validation failed. Reason: {0}")]
    GrantValidation(#[source] Box<Error>),

    /// The identity provider answered with a non-success status
    #[error("{status}:{body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Raw response body
        body: String,
    },

    /// The request never produced a response
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The identity provider answered with something we cannot interpret
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Discovery metadata was unavailable or incomplete
    #[error("metadata unavailable: {0}")]
    Metadata(String),

    /// A confidential client asked for a permission check without a bearer
    #[error("No bearer in header")]
    MissingBearer,

    /// The adapter configuration is unusable
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Wrap a token failure with grant-level context
    pub fn grant_validation(cause: Error) -> Self {
        Self::GrantValidation(Box::new(cause))
    }

    /// Whether retrying the whole operation later can succeed
    ///
    /// Transport failures and 5xx/429 answers are transient. Everything
    /// else (expired refresh tokens, failed validation) is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::KeyFetchFailed(_) | Self::Metadata(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::GrantValidation(cause) => cause.is_retryable(),
            _ => false,
        }
    }

    /// Whether this is one of the `invalid token (...)` validation failures
    pub fn is_token_rejection(&self) -> bool {
        matches!(
            self,
            Self::TokenMissing
                | Self::TokenExpired
                | Self::TokenNotSigned
                | Self::TokenWrongType { .. }
                | Self::TokenStale
                | Self::TokenWrongIssuer
                | Self::TokenWrongAudience
                | Self::TokenWrongAuthorizedParty
                | Self::TokenSignatureInvalid
                | Self::PublicKeySignatureInvalid
                | Self::MissingKid
        )
    }
}
