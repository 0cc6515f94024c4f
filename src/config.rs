//! Configuration subtrees consumed by the core (§6).
//!
//! This crate does not parse any file format — a [`ConfigManager`] collaborator hands
//! it already-deserialized subtrees. The types below are that subtree schema.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Asymmetric signature algorithms the validator will ever accept. HMAC and `none` are
/// not representable here at all — that's enforced by construction, not a runtime check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    RS256,
    RS384,
    RS512,
    PS256,
    PS384,
    PS512,
    ES256,
    ES384,
}

impl Algorithm {
    pub fn to_jsonwebtoken(self) -> jsonwebtoken::Algorithm {
        match self {
            Self::RS256 => jsonwebtoken::Algorithm::RS256,
            Self::RS384 => jsonwebtoken::Algorithm::RS384,
            Self::RS512 => jsonwebtoken::Algorithm::RS512,
            Self::PS256 => jsonwebtoken::Algorithm::PS256,
            Self::PS384 => jsonwebtoken::Algorithm::PS384,
            Self::PS512 => jsonwebtoken::Algorithm::PS512,
            Self::ES256 => jsonwebtoken::Algorithm::ES256,
            Self::ES384 => jsonwebtoken::Algorithm::ES384,
        }
    }

    pub fn default_allowlist() -> Vec<Algorithm> {
        vec![
            Self::RS256,
            Self::RS384,
            Self::RS512,
            Self::PS256,
            Self::PS384,
            Self::PS512,
            Self::ES256,
            Self::ES384,
        ]
    }
}

/// Claim-indicator lists per role, in priority order admin > user > custom (configured
/// order) > guest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleMappings {
    #[serde(default)]
    pub admin: Vec<String>,
    #[serde(default)]
    pub user: Vec<String>,
    #[serde(default)]
    pub guest: Vec<String>,
    /// Role name -> claim indicators, checked in insertion order after admin/user.
    #[serde(default)]
    pub custom: Vec<(String, Vec<String>)>,
    /// Role name -> permissions granted when that role matches.
    #[serde(default)]
    pub permissions: Vec<(String, Vec<String>)>,
    /// Role name -> scopes granted when that role matches, unioned with the `scope` claim.
    #[serde(default)]
    pub scopes: Vec<(String, Vec<String>)>,
}

/// One trusted identity provider (`auth.trustedIDPs[]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedIdpConfig {
    pub name: String,
    pub issuer: String,
    pub jwks_uri: String,
    /// Exact-match audience; JWT `aud` must contain this value.
    pub audience: String,
    #[serde(default = "Algorithm::default_allowlist")]
    pub allowed_algorithms: Vec<Algorithm>,
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_seconds: u64,
    pub max_token_age_seconds: Option<u64>,
    #[serde(default)]
    pub role_mappings: RoleMappings,
}

fn default_clock_skew_secs() -> u64 {
    60
}

impl TrustedIdpConfig {
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_seconds)
    }

    pub fn max_token_age(&self) -> Option<Duration> {
        self.max_token_age_seconds.map(Duration::from_secs)
    }

    /// Reject plain-HTTP JWKS endpoints at build time (localhost exempted for tests).
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::ConfigInvalid("trustedIDP.name is empty".into()));
        }
        if !self.jwks_uri.starts_with("https://") && !self.jwks_uri.starts_with("http://localhost")
        {
            return Err(CoreError::ConfigInvalid(format!(
                "jwks_uri for IDP '{}' must be HTTPS: {}",
                self.name, self.jwks_uri
            )));
        }
        if self.allowed_algorithms.is_empty() {
            return Err(CoreError::ConfigInvalid(format!(
                "IDP '{}' has an empty allowed_algorithms list",
                self.name
            )));
        }
        Ok(())
    }
}

/// `auth.audit` subtree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub enabled: bool,
    pub max_entries: Option<usize>,
}

/// `tokenExchange.cache` subtree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_seconds: u64,
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_seconds: u64,
    #[serde(default = "default_max_entries_per_session")]
    pub max_entries_per_session: usize,
    #[serde(default = "default_max_total_entries")]
    pub max_total_entries: usize,
}

fn default_cache_ttl_secs() -> u64 {
    60
}
fn default_session_timeout_secs() -> u64 {
    1800
}
fn default_max_entries_per_session() -> usize {
    10
}
fn default_max_total_entries() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_seconds: default_cache_ttl_secs(),
            session_timeout_seconds: default_session_timeout_secs(),
            max_entries_per_session: default_max_entries_per_session(),
            max_total_entries: default_max_total_entries(),
        }
    }
}

/// `tokenExchange` subtree — either top-level or per delegation module.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenExchangeConfig {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub default_audience: Option<String>,
    pub default_scope: Option<String>,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl std::fmt::Debug for TokenExchangeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchangeConfig")
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("default_audience", &self.default_audience)
            .field("default_scope", &self.default_scope)
            .field("cache", &self.cache)
            .finish()
    }
}

impl TokenExchangeConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if !self.token_endpoint.starts_with("https://")
            && !self.token_endpoint.starts_with("http://localhost")
        {
            return Err(CoreError::TokenExchangeConfigInvalid(format!(
                "token_endpoint must be HTTPS: {}",
                self.token_endpoint
            )));
        }
        if self.client_id.is_empty() {
            return Err(CoreError::TokenExchangeConfigInvalid(
                "client_id is empty".into(),
            ));
        }
        Ok(())
    }
}

/// One entry in `delegation.modules`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationModuleConfig {
    pub name: String,
    /// Explicit module type. The teacher's name-prefix auto-registration is
    /// intentionally not reproduced here (see DESIGN.md).
    pub module_type: String,
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
    pub token_exchange: Option<TokenExchangeConfig>,
}

/// `auth` subtree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub trusted_idps: Vec<TrustedIdpConfig>,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// `delegation` subtree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelegationConfig {
    #[serde(default)]
    pub modules: Vec<DelegationModuleConfig>,
    /// Consumed by the transport, not the core.
    pub default_tool_prefix: Option<String>,
}

/// Abstracts the source of validated configuration subtrees so this crate never parses
/// a file format itself.
pub trait ConfigManager: Send + Sync + std::fmt::Debug {
    fn auth(&self) -> CoreResult<AuthConfig>;
    fn delegation(&self) -> CoreResult<DelegationConfig>;
}

/// A [`ConfigManager`] backed by subtrees already held in memory — the common case
/// when the outer transport has already parsed its own config file.
#[derive(Debug, Clone)]
pub struct StaticConfigManager {
    auth: AuthConfig,
    delegation: DelegationConfig,
}

impl StaticConfigManager {
    pub fn new(auth: AuthConfig, delegation: DelegationConfig) -> Self {
        Self { auth, delegation }
    }
}

impl ConfigManager for StaticConfigManager {
    fn auth(&self) -> CoreResult<AuthConfig> {
        Ok(self.auth.clone())
    }

    fn delegation(&self) -> CoreResult<DelegationConfig> {
        Ok(self.delegation.clone())
    }
}
