//! Soft and hard authorization checks on a [`Session`] (C11, §4.11).
//!
//! Ground: `turbomcp-auth::context::AuthContext::has_role`/`has_scope` family,
//! reimplemented against [`Session`] and extended with `_hard` variants that raise
//! `CoreError::AuthorizationFailed` carrying the missing role/scope, since `Session`
//! (unlike the teacher's `AuthContext`) also carries a single `rejected` bit that gates
//! every other check.

use crate::error::{CoreError, CoreResult};
use crate::session::Session;

/// Soft (boolean) checks, used to compute per-request tool visibility.
pub trait Authorization {
    fn is_authenticated(&self) -> bool;
    fn has_role(&self, role: &str) -> bool;
    fn has_any_role(&self, roles: &[&str]) -> bool;
    fn has_all_roles(&self, roles: &[&str]) -> bool;
    fn has_permission(&self, permission: &str) -> bool;
    fn has_scope(&self, scope: &str) -> bool;
    fn has_any_scope(&self, scopes: &[&str]) -> bool;
    fn has_all_scopes(&self, scopes: &[&str]) -> bool;

    /// Hard checks: used inside handlers, raise on failure.
    fn require_role(&self, role: &str) -> CoreResult<()>;
    fn require_any_role(&self, roles: &[&str]) -> CoreResult<()>;
    fn require_scope(&self, scope: &str) -> CoreResult<()>;
    fn require_any_scope(&self, scopes: &[&str]) -> CoreResult<()>;
}

impl Authorization for Session {
    fn is_authenticated(&self) -> bool {
        !self.rejected
    }

    fn has_role(&self, role: &str) -> bool {
        !self.rejected && (self.primary_role == role || self.custom_roles.contains(role))
    }

    fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }

    fn has_all_roles(&self, roles: &[&str]) -> bool {
        !roles.is_empty() && roles.iter().all(|r| self.has_role(r))
    }

    fn has_permission(&self, permission: &str) -> bool {
        !self.rejected && self.permissions.contains(permission)
    }

    fn has_scope(&self, scope: &str) -> bool {
        !self.rejected && self.scopes.contains(scope)
    }

    fn has_any_scope(&self, scopes: &[&str]) -> bool {
        scopes.iter().any(|s| self.has_scope(s))
    }

    fn has_all_scopes(&self, scopes: &[&str]) -> bool {
        !scopes.is_empty() && scopes.iter().all(|s| self.has_scope(s))
    }

    fn require_role(&self, role: &str) -> CoreResult<()> {
        if self.has_role(role) {
            Ok(())
        } else {
            Err(CoreError::AuthorizationFailed(format!("role:{role}")))
        }
    }

    fn require_any_role(&self, roles: &[&str]) -> CoreResult<()> {
        if self.has_any_role(roles) {
            Ok(())
        } else {
            Err(CoreError::AuthorizationFailed(format!(
                "any_role:{}",
                roles.join("|")
            )))
        }
    }

    fn require_scope(&self, scope: &str) -> CoreResult<()> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(CoreError::AuthorizationFailed(format!("scope:{scope}")))
        }
    }

    fn require_any_scope(&self, scopes: &[&str]) -> CoreResult<()> {
        if self.has_any_scope(scopes) {
            Ok(())
        } else {
            Err(CoreError::AuthorizationFailed(format!(
                "any_scope:{}",
                scopes.join("|")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{Claims, StandardClaims};
    use crate::role_mapper::RoleMapResult;
    use crate::session::SessionManager;
    use std::collections::HashSet;

    fn session_with(primary_role: &str, permissions: &[&str], scopes: &[&str]) -> Session {
        let claims = Claims {
            standard: StandardClaims {
                iss: Some("https://idp.test".into()),
                sub: Some("u1".into()),
                ..Default::default()
            },
            raw: serde_json::Map::new(),
            access_token: "t".into(),
        };
        let role_result = RoleMapResult {
            primary_role: primary_role.to_string(),
            custom_roles: HashSet::new(),
            permissions: permissions.iter().map(|s| s.to_string()).collect(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            mapping_failed: false,
            failure_reason: None,
        };
        SessionManager::new().create(claims, role_result).unwrap()
    }

    #[test]
    fn has_role_and_scope_checks() {
        let session = session_with("admin", &["write:posts"], &["openid"]);
        assert!(session.has_role("admin"));
        assert!(session.has_permission("write:posts"));
        assert!(session.has_scope("openid"));
        assert!(!session.has_role("superuser"));
    }

    #[test]
    fn require_role_raises_authorization_failed_on_mismatch() {
        let session = session_with("user", &[], &[]);
        let err = session.require_role("admin").unwrap_err();
        assert!(matches!(err, CoreError::AuthorizationFailed(_)));
    }

    #[test]
    fn rejected_session_fails_every_check() {
        let mut session = session_with("admin", &["write:posts"], &["openid"]);
        session.rejected = true;
        assert!(!session.is_authenticated());
        assert!(!session.has_role("admin"));
        assert!(!session.has_scope("openid"));
    }
}
