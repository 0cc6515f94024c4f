//! Dependency-injection container and build sequence (C9, §4.9).
//!
//! `Orchestrator::build` runs every validation at *build* time so a misconfiguration
//! aborts startup rather than surfacing on the first request.

use std::sync::Arc;

use tracing::warn;

use crate::audit::{AuditService, build_audit_service};
use crate::auth_service::AuthenticationService;
use crate::cache::TokenCache;
use crate::config::{ConfigManager, TokenExchangeConfig};
use crate::delegation::{DelegationModule, DelegationRegistry};
use crate::error::{CoreError, CoreResult};
use crate::jwt::JwtDispatcher;
use crate::role_mapper::RoleMapper;
use crate::session::SessionManager;
use crate::token_exchange::TokenExchangeService;

/// The single injection object the outer transport and tool handlers hold a shared
/// reference to. Core (§4.1-§4.4) has no knowledge of delegation; delegation depends on
/// core; transport/tools depend on both via `CoreContext`. No back-edges.
pub struct CoreContext {
    pub auth_service: Arc<AuthenticationService>,
    pub audit_service: Arc<dyn AuditService>,
    pub delegation_registry: Arc<DelegationRegistry>,
    pub config_manager: Arc<dyn ConfigManager>,
}

impl CoreContext {
    /// Build a [`TokenExchangeService`] sharing this context's audit sink. Exposed here
    /// (rather than as a stored field) because §4.8 requires modules reach the
    /// token-exchange service "through `ctx.core`" while §4.9 fixes `CoreContext`'s
    /// field set to exactly four members; a constructor method satisfies both.
    pub fn build_token_exchange(
        &self,
        config: TokenExchangeConfig,
        cache: Arc<dyn TokenCache>,
    ) -> CoreResult<TokenExchangeService> {
        TokenExchangeService::new(config, cache, self.audit_service.clone())
    }

    #[cfg(test)]
    pub fn for_tests(audit_service: Arc<dyn AuditService>) -> Self {
        use crate::config::{Algorithm, AuthConfig, DelegationConfig, StaticConfigManager, TrustedIdpConfig};

        let idp = TrustedIdpConfig {
            name: "test-idp".to_string(),
            issuer: "https://idp.test".to_string(),
            jwks_uri: "http://localhost:1/jwks.json".to_string(),
            audience: "test-aud".to_string(),
            allowed_algorithms: Algorithm::default_allowlist(),
            clock_skew_seconds: 60,
            max_token_age_seconds: None,
            role_mappings: Default::default(),
        };
        let dispatcher = JwtDispatcher::new(vec![idp]).expect("valid test IDP config");
        let auth_service = Arc::new(AuthenticationService::new(
            dispatcher,
            RoleMapper::new(Default::default()),
            SessionManager::new(),
            audit_service.clone(),
        ));

        Self {
            auth_service,
            audit_service: audit_service.clone(),
            delegation_registry: Arc::new(DelegationRegistry::new(audit_service)),
            config_manager: Arc::new(StaticConfigManager::new(
                AuthConfig::default(),
                DelegationConfig::default(),
            )),
        }
    }
}

/// Assembles a [`CoreContext`] from validated config subtrees and already-constructed
/// delegation modules (the orchestrator cannot itself know concrete module types — the
/// host application constructs them and hands them in to be registered and
/// initialized).
pub struct Orchestrator;

impl Orchestrator {
    pub async fn build(
        config_manager: Arc<dyn ConfigManager>,
        modules: Vec<Arc<dyn DelegationModule>>,
    ) -> CoreResult<CoreContext> {
        let auth_config = config_manager.auth()?;
        let delegation_config = config_manager.delegation()?;

        if auth_config.trusted_idps.is_empty() {
            return Err(CoreError::ConfigInvalid(
                "auth.trustedIDPs must be non-empty".into(),
            ));
        }

        let audit_service = build_audit_service(&auth_config.audit);

        // A single RoleMapper/SessionManager pair serves every trusted IDP (§4.9 step 3
        // names them in the singular); the first IDP's role_mappings is authoritative —
        // see DESIGN.md for the multi-IDP role-mapping decision.
        let role_mappings = auth_config
            .trusted_idps
            .first()
            .map(|idp| idp.role_mappings.clone())
            .unwrap_or_default();

        let dispatcher = JwtDispatcher::new(auth_config.trusted_idps)?;
        let role_mapper = RoleMapper::new(role_mappings);
        let session_manager = SessionManager::new();
        let auth_service = Arc::new(AuthenticationService::new(
            dispatcher,
            role_mapper,
            session_manager,
            audit_service.clone(),
        ));

        let delegation_registry = Arc::new(DelegationRegistry::new(audit_service.clone()));
        let mut module_configs = std::collections::HashMap::new();
        for module_config in &delegation_config.modules {
            module_configs.insert(module_config.name.clone(), module_config.settings.clone());
        }
        for module in modules {
            delegation_registry.register(module).await;
        }
        delegation_registry.initialize_all(&module_configs).await?;

        for name in delegation_registry.list().await {
            if let Some(module) = delegation_registry.get(&name).await
                && !module.health_check().await
            {
                warn!(module = %name, "delegation module failed health check at startup; continuing in degraded mode");
            }
        }

        Ok(CoreContext {
            auth_service,
            audit_service,
            delegation_registry,
            config_manager,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NoopAuditService;

    #[tokio::test]
    async fn for_tests_context_is_well_formed() {
        let ctx = CoreContext::for_tests(Arc::new(NoopAuditService));
        assert_eq!(ctx.delegation_registry.list().await.len(), 0);
    }
}
