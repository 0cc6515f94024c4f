//! Claim -> role/permission/scope projection (C3, §4.3).
//!
//! `determine` must never panic or return `Err` — any internal failure is converted to
//! an `UNASSIGNED_ROLE` result with `mapping_failed = true` so `SessionManager` always
//! has something to build a (possibly rejected) `Session` from.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use crate::claims::Claims;
use crate::config::RoleMappings;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";
pub const ROLE_GUEST: &str = "guest";
pub const UNASSIGNED_ROLE: &str = "unassigned";

/// Outcome of mapping a claim set to a role. See §3 "RoleMapResult".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMapResult {
    pub primary_role: String,
    pub custom_roles: HashSet<String>,
    pub permissions: HashSet<String>,
    pub scopes: HashSet<String>,
    pub mapping_failed: bool,
    pub failure_reason: Option<String>,
}

impl RoleMapResult {
    fn unassigned(reason: impl Into<String>) -> Self {
        Self {
            primary_role: UNASSIGNED_ROLE.to_string(),
            custom_roles: HashSet::new(),
            permissions: HashSet::new(),
            scopes: HashSet::new(),
            mapping_failed: true,
            failure_reason: Some(reason.into()),
        }
    }
}

/// Projects decoded claims onto roles/permissions/scopes per a per-IDP [`RoleMappings`]
/// configuration.
#[derive(Debug, Clone)]
pub struct RoleMapper {
    mappings: RoleMappings,
}

impl RoleMapper {
    pub fn new(mappings: RoleMappings) -> Self {
        Self { mappings }
    }

    /// Determine the role mapping for a claim set. Ordering is strict: admin
    /// indicators first, then user, then each configured custom role in configured
    /// order, then guest; an empty/unmatched set yields `UNASSIGNED_ROLE`.
    pub fn determine(&self, claims: &Claims) -> RoleMapResult {
        // The claim set is attacker-controlled arbitrary JSON; a hostile shape (deeply
        // nested arrays, unexpected types) must never be allowed to panic this path, so
        // the actual projection runs behind a catch_unwind as a defense in depth on top
        // of the already-panic-free logic below.
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.determine_inner(claims)));

        match result {
            Ok(r) => r,
            Err(_) => RoleMapResult::unassigned("role mapping panicked"),
        }
    }

    fn determine_inner(&self, claims: &Claims) -> RoleMapResult {
        let mut primary_role = None;
        let mut custom_roles = HashSet::new();
        let mut permissions = HashSet::new();
        let mut scopes: HashSet<String> = claims.scope_claim().into_iter().collect();

        let role_claims: HashSet<String> = claims
            .claim_values("roles")
            .into_iter()
            .chain(claims.claim_values("role"))
            .collect();

        if any_indicator_present(&role_claims, claims, &self.mappings.admin) {
            primary_role = Some(ROLE_ADMIN.to_string());
        } else if any_indicator_present(&role_claims, claims, &self.mappings.user) {
            primary_role = Some(ROLE_USER.to_string());
        } else {
            for (role_name, indicators) in &self.mappings.custom {
                if any_indicator_present(&role_claims, claims, indicators) {
                    primary_role = Some(role_name.clone());
                    custom_roles.insert(role_name.clone());
                    break;
                }
            }
        }

        if primary_role.is_none() && any_indicator_present(&role_claims, claims, &self.mappings.guest)
        {
            primary_role = Some(ROLE_GUEST.to_string());
        }

        let Some(primary_role) = primary_role else {
            return RoleMapResult::unassigned("no configured role indicator matched");
        };

        for (role_name, perms) in &self.mappings.permissions {
            if role_name == &primary_role || custom_roles.contains(role_name) {
                permissions.extend(perms.iter().cloned());
            }
        }
        for (role_name, role_scopes) in &self.mappings.scopes {
            if role_name == &primary_role || custom_roles.contains(role_name) {
                scopes.extend(role_scopes.iter().cloned());
            }
        }

        RoleMapResult {
            primary_role,
            custom_roles,
            permissions,
            scopes,
            mapping_failed: false,
            failure_reason: None,
        }
    }
}

/// An indicator matches either a bare role-claim value or `key:value` shorthand
/// referring to any other raw claim (`"department:engineering"` -> `claims["department"]
/// == "engineering"` or contains it, for array-valued claims).
fn any_indicator_present(role_claims: &HashSet<String>, claims: &Claims, indicators: &[String]) -> bool {
    indicators.iter().any(|indicator| {
        if role_claims.contains(indicator) {
            return true;
        }
        if let Some((key, value)) = indicator.split_once(':') {
            return claims.claim_values(key).iter().any(|v| v == value);
        }
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims_with(raw: serde_json::Map<String, serde_json::Value>) -> Claims {
        Claims {
            standard: Default::default(),
            raw,
            access_token: "t".into(),
        }
    }

    fn mappings() -> RoleMappings {
        RoleMappings {
            admin: vec!["admin".to_string()],
            user: vec!["user".to_string()],
            guest: vec!["guest".to_string()],
            custom: vec![("auditor".to_string(), vec!["audit".to_string()])],
            permissions: vec![("admin".to_string(), vec!["*".to_string()])],
            scopes: vec![("user".to_string(), vec!["read".to_string()])],
        }
    }

    #[test]
    fn admin_outranks_user_when_both_present() {
        let mapper = RoleMapper::new(mappings());
        let mut raw = serde_json::Map::new();
        raw.insert("roles".into(), json!(["user", "admin"]));
        let result = mapper.determine(&claims_with(raw));
        assert_eq!(result.primary_role, ROLE_ADMIN);
        assert!(!result.mapping_failed);
        assert!(result.permissions.contains("*"));
    }

    #[test]
    fn custom_role_checked_before_guest() {
        let mapper = RoleMapper::new(mappings());
        let mut raw = serde_json::Map::new();
        raw.insert("roles".into(), json!(["audit", "guest"]));
        let result = mapper.determine(&claims_with(raw));
        assert_eq!(result.primary_role, "auditor");
        assert!(result.custom_roles.contains("auditor"));
    }

    #[test]
    fn unmatched_claims_yield_unassigned_with_empty_permissions_and_scopes() {
        let mapper = RoleMapper::new(mappings());
        let result = mapper.determine(&claims_with(serde_json::Map::new()));
        assert_eq!(result.primary_role, UNASSIGNED_ROLE);
        assert!(result.mapping_failed);
        assert!(result.permissions.is_empty());
        assert!(result.scopes.is_empty());
    }

    #[test]
    fn never_panics_on_adversarial_claim_shapes() {
        let mapper = RoleMapper::new(mappings());
        let mut raw = serde_json::Map::new();
        raw.insert("roles".into(), json!({"nested": ["weird", {"x": 1}]}));
        raw.insert("scope".into(), json!(12345));
        let result = mapper.determine(&claims_with(raw));
        assert_eq!(result.primary_role, UNASSIGNED_ROLE);
    }

    #[test]
    fn key_value_indicator_shorthand_matches_raw_claims() {
        let mut mappings = mappings();
        mappings.custom = vec![("eng".to_string(), vec!["department:engineering".to_string()])];
        let mapper = RoleMapper::new(mappings);
        let mut raw = serde_json::Map::new();
        raw.insert("department".into(), json!("engineering"));
        let result = mapper.determine(&claims_with(raw));
        assert_eq!(result.primary_role, "eng");
    }
}
