//! Decoded JWT claims.
//!
//! Claims are kept as a strongly-typed struct of registered RFC 7519 claims plus an
//! opaque `serde_json::Map` of whatever else the token carried, so downstream code can
//! read `claims.standard.sub` without a lookup but still reach module-specific claims
//! (e.g. a legacy-username claim) by key.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Standard JWT claims per RFC 7519 Section 4.1.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StandardClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// `aud` may be a single string or an array in the wire format; normalized here.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aud: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// Decoded bearer token: standard claims, the full raw claim map, and the original
/// compact JWT the claims were decoded from (retained for token exchange / AAD binding).
#[derive(Debug, Clone)]
pub struct Claims {
    pub standard: StandardClaims,
    pub raw: serde_json::Map<String, Value>,
    /// The compact JWT this struct was decoded from. Never logged.
    pub access_token: String,
}

impl Claims {
    /// Read an arbitrary claim by name from the raw claim map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    /// Read a claim expected to be a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.raw.get(key).and_then(Value::as_str)
    }

    /// `scope` claim, split on whitespace per RFC 6749 §3.3.
    pub fn scope_claim(&self) -> Vec<String> {
        self.get_str("scope")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Every string-or-string-array claim value, flattened, for a given key — used by
    /// the role mapper to check configured indicator claims without guessing shape.
    pub fn claim_values(&self, key: &str) -> Vec<String> {
        match self.raw.get(key) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn as_map(&self) -> HashMap<String, Value> {
        self.raw.clone().into_iter().collect()
    }
}
