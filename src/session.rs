//! Normalized session (C4, §3 "Session", §4.4).

use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::claims::Claims;
use crate::error::{CoreError, CoreResult};
use crate::role_mapper::{RoleMapResult, UNASSIGNED_ROLE};

pub const SESSION_VERSION: u32 = 1;

/// Normalized, immutable per-request view of the authenticated principal. Created only
/// by [`SessionManager::create`], which enforces the rejection invariant.
#[derive(Debug, Clone)]
pub struct Session {
    pub version: u32,
    pub user_id: String,
    pub issuer: String,
    pub legacy_username: Option<String>,
    pub primary_role: String,
    pub custom_roles: HashSet<String>,
    pub permissions: HashSet<String>,
    pub scopes: HashSet<String>,
    pub claims: Claims,
    pub rejected: bool,
    pub rejection_reason: Option<String>,
    pub created_at: SystemTime,
    pub expires_at: Option<SystemTime>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| exp <= SystemTime::now())
            .unwrap_or(false)
    }
}

/// Builds and validates [`Session`] objects.
#[derive(Debug, Clone, Default)]
pub struct SessionManager;

impl SessionManager {
    pub fn new() -> Self {
        Self
    }

    /// Build a session from validated claims and a role-mapping result. Enforces both
    /// the rejection invariant and the empty-permissions invariant; violating either is
    /// a programmer error (`INVARIANT_VIOLATED`), not a data problem, because
    /// `RoleMapper::determine` already guarantees them.
    pub fn create(&self, claims: Claims, role_result: RoleMapResult) -> CoreResult<Session> {
        let rejected = role_result.primary_role == UNASSIGNED_ROLE;

        if rejected && (!role_result.permissions.is_empty() || !role_result.scopes.is_empty()) {
            return Err(CoreError::InvariantViolated(
                "unassigned role carried non-empty permissions or scopes".into(),
            ));
        }

        let issuer = claims
            .standard
            .iss
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let user_id = claims
            .standard
            .sub
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let expires_at = claims
            .standard
            .exp
            .map(|exp| UNIX_EPOCH + Duration::from_secs(exp));

        let session = Session {
            version: SESSION_VERSION,
            user_id,
            issuer,
            legacy_username: claims.get_str("legacy_username").map(str::to_string),
            primary_role: role_result.primary_role,
            custom_roles: role_result.custom_roles,
            permissions: role_result.permissions,
            scopes: role_result.scopes,
            claims,
            rejected,
            rejection_reason: if rejected {
                Some(
                    role_result
                        .failure_reason
                        .unwrap_or_else(|| "no role assigned".to_string()),
                )
            } else {
                None
            },
            created_at: SystemTime::now(),
            expires_at,
        };

        self.validate(&session)?;
        Ok(session)
    }

    /// Defensive re-check, used at every boundary that accepts a session built
    /// elsewhere (e.g. deserialized from a migration).
    pub fn validate(&self, session: &Session) -> CoreResult<()> {
        let unassigned = session.primary_role == UNASSIGNED_ROLE;

        if unassigned && !session.rejected {
            return Err(CoreError::InvariantViolated(
                "unassigned role session is not marked rejected".into(),
            ));
        }
        if unassigned && (!session.permissions.is_empty() || !session.scopes.is_empty()) {
            return Err(CoreError::InvariantViolated(
                "unassigned role session carries non-empty permissions or scopes".into(),
            ));
        }
        Ok(())
    }

    /// Upgrade a pre-v1 session record (no `version`, no `rejected`) to v1 by deriving
    /// `rejected` from `primary_role` and defaulting `issuer` when absent. A fixed
    /// point for v1 inputs: `migrate(migrate(x)) == migrate(x)`.
    pub fn migrate(&self, mut session: Session) -> Session {
        if session.version >= SESSION_VERSION {
            return session;
        }

        session.version = SESSION_VERSION;
        if session.issuer.is_empty() {
            session.issuer = "unknown".to_string();
        }
        session.rejected = session.primary_role == UNASSIGNED_ROLE;
        if session.rejected {
            session.permissions.clear();
            session.scopes.clear();
            if session.rejection_reason.is_none() {
                session.rejection_reason = Some("migrated from legacy session record".to_string());
            }
        }
        session
    }
}
