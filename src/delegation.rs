//! Delegation module contract and registry (C8, §4.8).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::audit::{AuditEntry, AuditService};
use crate::context::CoreContext;
use crate::error::{CoreError, CoreResult};
use crate::session::Session;

/// Outcome of a `delegate` call. Connectivity/IDP/downstream failures are reported
/// here, never as a propagated `Err` — only programmer errors (missing/uninitialized
/// module) raise (§4.8 "Failure semantics"). `audit_trail` is the module's own account
/// of what it did; the registry forwards it to the audit service alongside its own
/// "delegate" entry.
#[derive(Debug, Clone)]
pub struct DelegationResult<T> {
    pub success: bool,
    pub value: Option<T>,
    pub error: Option<String>,
    pub audit_trail: AuditEntry,
}

impl<T> DelegationResult<T> {
    pub fn ok(value: T, audit_trail: AuditEntry) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
            audit_trail,
        }
    }

    pub fn failure(error: impl Into<String>, audit_trail: AuditEntry) -> Self {
        let error = error.into();
        Self {
            success: false,
            value: None,
            error: Some(error),
            audit_trail,
        }
    }
}

/// Call-scoped context handed to a module. Modules must not retain `core` beyond the
/// `delegate` call — it is borrowed only to reach the token-exchange service.
pub struct ModuleContext<'a> {
    pub session_id: Option<String>,
    pub core: &'a CoreContext,
}

/// A named, independently initializable unit of delegated behavior. Modules never hold
/// a reference to the audit service directly — the registry is the only place that
/// logs delegation events (§4.8).
#[async_trait]
pub trait DelegationModule: Send + Sync {
    fn name(&self) -> &str;
    fn module_type(&self) -> &str;

    async fn initialize(&self, config: &serde_json::Map<String, Value>) -> CoreResult<()>;

    /// Perform the delegated action. The requestor's session gates access to the tool
    /// upstream (§4.11); the session's own claims must never be used to authorize the
    /// downstream action — only a delegation token's claims may do that.
    async fn delegate(
        &self,
        session: &Session,
        action: &str,
        params: &Value,
        ctx: ModuleContext<'_>,
    ) -> DelegationResult<Value>;

    async fn validate_access(&self, session: &Session) -> bool;
    async fn health_check(&self) -> bool;
    async fn destroy(&self);
}

/// Named registry of delegation modules. The sole place that emits
/// `source = "delegation:registry"` audit entries; a module's own audit trail (if any)
/// is forwarded verbatim alongside the registry's own entry.
pub struct DelegationRegistry {
    modules: RwLock<HashMap<String, Arc<dyn DelegationModule>>>,
    audit: Arc<dyn AuditService>,
}

impl DelegationRegistry {
    pub fn new(audit: Arc<dyn AuditService>) -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            audit,
        }
    }

    pub async fn register(&self, module: Arc<dyn DelegationModule>) {
        let name = module.name().to_string();
        self.modules.write().await.insert(name, module);
    }

    pub async fn unregister(&self, name: &str) {
        self.modules.write().await.remove(name);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn DelegationModule>> {
        self.modules.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<String> {
        self.modules.read().await.keys().cloned().collect()
    }

    pub async fn initialize_all(
        &self,
        configs: &HashMap<String, serde_json::Map<String, Value>>,
    ) -> CoreResult<()> {
        let modules = self.modules.read().await;
        for (name, module) in modules.iter() {
            let empty = serde_json::Map::new();
            let config = configs.get(name).unwrap_or(&empty);
            module.initialize(config).await?;
        }
        Ok(())
    }

    pub async fn destroy_all(&self) {
        let modules = self.modules.read().await;
        for module in modules.values() {
            module.destroy().await;
        }
    }

    /// Route a `delegate` call by module name, logging the outcome (including a
    /// "module not found" outcome) with `source = "delegation:registry"`.
    pub async fn delegate(
        &self,
        module_name: &str,
        session: &Session,
        action: &str,
        params: &Value,
        session_id: Option<String>,
        core: &CoreContext,
    ) -> CoreResult<DelegationResult<Value>> {
        let Some(module) = self.get(module_name).await else {
            self.audit.log(
                AuditEntry::new("delegation:registry", "module_not_found", false)
                    .with_user(session.user_id.clone())
                    .with_metadata("module", module_name.to_string())
                    .with_metadata("action", action.to_string())
                    .with_error(format!("module '{module_name}' not found")),
            );
            return Err(CoreError::ModuleNotFound(module_name.to_string()));
        };

        let ctx = ModuleContext {
            session_id,
            core,
        };
        let result = module.delegate(session, action, params, ctx).await;

        self.audit.log(result.audit_trail.clone());
        self.audit.log(
            AuditEntry::new("delegation:registry", "delegate", result.success)
                .with_user(session.user_id.clone())
                .with_metadata("module", module_name.to_string())
                .with_metadata("action", action.to_string())
                .with_error(result.error.clone().unwrap_or_default()),
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditFilter, InMemoryAuditService};
    use crate::config::AuditConfig;

    fn audit() -> Arc<InMemoryAuditService> {
        Arc::new(InMemoryAuditService::new(&AuditConfig {
            enabled: true,
            max_entries: Some(100),
        }))
    }

    #[tokio::test]
    async fn delegate_to_unknown_module_is_audited_and_errors() {
        let audit_service = audit();
        let registry = DelegationRegistry::new(audit_service.clone());

        let session = test_session();
        let core = CoreContext::for_tests(audit_service.clone());

        let err = registry
            .delegate("nonexistent", &session, "do_thing", &Value::Null, None, &core)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ModuleNotFound(_)));

        let entries = audit_service.query(AuditFilter {
            source_prefix: Some("delegation:".to_string()),
            ..Default::default()
        });
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "module_not_found");
    }

    struct EchoModule;

    #[async_trait]
    impl DelegationModule for EchoModule {
        fn name(&self) -> &str {
            "echo"
        }

        fn module_type(&self) -> &str {
            "test"
        }

        async fn initialize(&self, _config: &serde_json::Map<String, Value>) -> CoreResult<()> {
            Ok(())
        }

        async fn delegate(
            &self,
            session: &Session,
            action: &str,
            params: &Value,
            _ctx: ModuleContext<'_>,
        ) -> DelegationResult<Value> {
            DelegationResult::ok(
                params.clone(),
                AuditEntry::new("delegation:echo", action, true)
                    .with_user(session.user_id.clone()),
            )
        }

        async fn validate_access(&self, _session: &Session) -> bool {
            true
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn destroy(&self) {}
    }

    #[tokio::test]
    async fn delegate_forwards_the_modules_own_audit_trail() {
        let audit_service = audit();
        let registry = DelegationRegistry::new(audit_service.clone());
        registry.register(Arc::new(EchoModule)).await;

        let session = test_session();
        let core = CoreContext::for_tests(audit_service.clone());

        let result = registry
            .delegate("echo", &session, "ping", &Value::String("pong".into()), None, &core)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.audit_trail.action, "ping");

        let entries = audit_service.query(AuditFilter {
            source_prefix: Some("delegation:".to_string()),
            ..Default::default()
        });
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.source == "delegation:echo" && e.action == "ping"));
        assert!(entries.iter().any(|e| e.source == "delegation:registry" && e.action == "delegate"));
    }

    fn test_session() -> Session {
        use crate::claims::{Claims, StandardClaims};
        use crate::role_mapper::RoleMapResult;
        use crate::session::SessionManager;
        use std::collections::HashSet;

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
            primary_role: "user".to_string(),
            custom_roles: HashSet::new(),
            permissions: HashSet::new(),
            scopes: HashSet::new(),
            mapping_failed: false,
            failure_reason: None,
        };
        SessionManager::new().create(claims, role_result).unwrap()
    }
}
