//! Authentication pipeline entry point (C5, §4.5).

use std::sync::Arc;

use crate::audit::{AuditEntry, AuditService};
use crate::claims::Claims;
use crate::error::CoreResult;
use crate::jwt::JwtDispatcher;
use crate::role_mapper::RoleMapper;
use crate::session::{Session, SessionManager};

/// Outcome of [`AuthenticationService::authenticate`]. Validation failures (malformed
/// token, unknown issuer, bad signature, ...) are `Err(CoreError)`; a structurally valid
/// but unmapped/rejected principal is `Ok(AuthResult{rejected: true, ..})` — these are
/// distinct failure surfaces (401 vs 403 at the transport, §4.10).
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub session: Session,
    pub rejected: bool,
    pub rejection_reason: Option<String>,
}

/// Composes C2 (JWT validation) + C3 (role mapping) + C4 (session construction) into a
/// single `authenticate` call, auditing both outcomes.
pub struct AuthenticationService {
    dispatcher: JwtDispatcher,
    role_mapper: RoleMapper,
    session_manager: SessionManager,
    audit: Arc<dyn AuditService>,
}

impl AuthenticationService {
    pub fn new(
        dispatcher: JwtDispatcher,
        role_mapper: RoleMapper,
        session_manager: SessionManager,
        audit: Arc<dyn AuditService>,
    ) -> Self {
        Self {
            dispatcher,
            role_mapper,
            session_manager,
            audit,
        }
    }

    /// Validate a compact bearer token end to end and build a [`Session`]. Never
    /// returns `Err` for an unmapped principal — that is `Ok(AuthResult{rejected: true})`.
    pub async fn authenticate(&self, bearer_token: &str) -> CoreResult<AuthResult> {
        let claims: Claims = self.dispatcher.validate(bearer_token).await?;
        let role_result = self.role_mapper.determine(&claims);

        let issuer = claims.standard.iss.clone().unwrap_or_default();
        let audience = claims.standard.aud.join(",");
        let role = role_result.primary_role.clone();

        let session = self.session_manager.create(claims, role_result)?;

        if session.rejected {
            self.audit.log(
                AuditEntry::new("auth:service", "auth_rejected", false)
                    .with_user(session.user_id.clone())
                    .with_metadata("issuer", issuer)
                    .with_metadata("audience", audience)
                    .with_metadata("role", role)
                    .with_error(
                        session
                            .rejection_reason
                            .clone()
                            .unwrap_or_else(|| "no role assigned".to_string()),
                    ),
            );
        } else {
            self.audit.log(
                AuditEntry::new("auth:service", "authenticate_success", true)
                    .with_user(session.user_id.clone())
                    .with_metadata("issuer", issuer)
                    .with_metadata("audience", audience)
                    .with_metadata("role", role),
            );
        }

        Ok(AuthResult {
            rejected: session.rejected,
            rejection_reason: session.rejection_reason.clone(),
            session,
        })
    }
}
