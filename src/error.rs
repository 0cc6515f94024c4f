//! Core error type
//!
//! Every fallible operation in this crate returns [`CoreError`]. Authentication and
//! authorization variants are meant to be surfaced directly to the transport (401/403);
//! token-exchange and delegation variants are meant to be *contained* inside a
//! [`crate::delegation::DelegationResult`] rather than propagated as a hard error.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type CoreResult<T> = Result<T, CoreError>;

/// All error kinds the core surfaces, grouped per the authentication/authorization/
/// token-exchange/delegation/internal taxonomy.
#[derive(Debug, Error)]
pub enum CoreError {
    // ---- Authentication ----
    #[error("malformed or unparseable token")]
    InvalidToken,

    #[error("unknown issuer: {0}")]
    UnknownIssuer(String),

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("disallowed signing algorithm: {0}")]
    DisallowedAlgorithm(String),

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("invalid audience")]
    InvalidAudience,

    #[error("unknown key id: {0}")]
    UnknownKey(String),

    #[error("JWKS endpoint unavailable: {0}")]
    JwksUnavailable(String),

    // ---- Authorization ----
    #[error("session rejected: {0}")]
    SessionRejected(String),

    #[error("authorization failed: missing {0}")]
    AuthorizationFailed(String),

    // ---- Token exchange ----
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("token exchange timed out")]
    TokenExchangeTimeout,

    #[error("token exchange configuration invalid: {0}")]
    TokenExchangeConfigInvalid(String),

    // ---- Delegation ----
    #[error("delegation module not found: {0}")]
    ModuleNotFound(String),

    #[error("delegation module not ready: {0}")]
    ModuleNotReady(String),

    #[error("delegation failed: {0}")]
    DelegationFailed(String),

    // ---- Internal ----
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl CoreError {
    /// HTTP status code a transport should map this error to.
    ///
    /// Token-exchange/delegation variants are not meant to cross the transport
    /// boundary directly (they are wrapped in a `DelegationResult`); they still get a
    /// conservative mapping so a misuse doesn't panic.
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidToken
            | Self::UnknownIssuer(_)
            | Self::InvalidSignature
            | Self::DisallowedAlgorithm(_)
            | Self::Expired
            | Self::NotYetValid
            | Self::InvalidAudience
            | Self::UnknownKey(_)
            | Self::Jwt(_) => 401,

            Self::SessionRejected(_) | Self::AuthorizationFailed(_) => 403,

            Self::ModuleNotFound(_) => 404,

            Self::ConfigInvalid(_) | Self::TokenExchangeConfigInvalid(_) => 500,
            Self::InvariantViolated(_) => 500,

            Self::JwksUnavailable(_)
            | Self::TokenExchangeFailed(_)
            | Self::TokenExchangeTimeout
            | Self::ModuleNotReady(_)
            | Self::DelegationFailed(_)
            | Self::Http(_) => 503,
        }
    }

    /// The `error` field of a `WWW-Authenticate: Bearer ...` challenge, per RFC 6750.
    pub const fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::SessionRejected(_) => "insufficient_scope",
            Self::AuthorizationFailed(_) => "insufficient_scope",
            _ => "invalid_token",
        }
    }

    /// True for errors safe to retry without changing the request.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::JwksUnavailable(_) | Self::TokenExchangeTimeout | Self::Http(_)
        )
    }

    /// Strip control characters and cap length for use in a user-visible header value.
    pub fn sanitized_description(&self) -> String {
        let raw = self.to_string();
        let stripped: String = raw.chars().filter(|c| !c.is_control()).collect();
        stripped.chars().take(200).collect()
    }
}
