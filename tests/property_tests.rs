//! Property-based tests for the core's claim-projection and session-migration invariants.
//!
//! Uses proptest to verify:
//! - `RoleMapper::determine` never panics, for any claim shape
//! - `SessionManager::migrate` is a fixed point once a session reaches `SESSION_VERSION`

use std::collections::HashSet;
use std::time::SystemTime;

use mcp_delegation_core::claims::{Claims, StandardClaims};
use mcp_delegation_core::config::RoleMappings;
use mcp_delegation_core::role_mapper::{RoleMapResult, RoleMapper};
use mcp_delegation_core::session::{SESSION_VERSION, Session, SessionManager};
use proptest::prelude::*;
use serde_json::Value;

fn role_mappings() -> RoleMappings {
    RoleMappings {
        admin: vec!["admin".to_string()],
        user: vec!["user".to_string()],
        guest: vec!["guest".to_string()],
        custom: vec![("auditor".to_string(), vec!["audit".to_string()])],
        permissions: vec![("admin".to_string(), vec!["*".to_string()])],
        scopes: vec![("user".to_string(), vec!["read".to_string()])],
    }
}

/// Arbitrary, possibly-adversarial JSON a claim value might hold: primitives, arrays,
/// and one level of nested object, mirroring what an attacker-controlled token could
/// put under `roles` or `scope`.
fn json_value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::from(n)),
        ".*".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 16, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
            prop::collection::btree_map(".*", inner, 0..5)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Strategy for a claim map with attacker-controlled shapes under the keys
/// `RoleMapper` actually reads (`roles`, `role`, `scope`, plus a grab-bag key).
fn claims_strategy() -> impl Strategy<Value = Claims> {
    (
        json_value_strategy(),
        json_value_strategy(),
        json_value_strategy(),
        json_value_strategy(),
    )
        .prop_map(|(roles, role, scope, other)| {
            let mut raw = serde_json::Map::new();
            raw.insert("roles".to_string(), roles);
            raw.insert("role".to_string(), role);
            raw.insert("scope".to_string(), scope);
            raw.insert("department".to_string(), other);
            Claims {
                standard: StandardClaims::default(),
                raw,
                access_token: "t".to_string(),
            }
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: `determine` never panics regardless of claim shape, and an
    /// unassigned result always carries empty permissions/scopes (§4.3 invariant).
    #[test]
    fn prop_role_mapper_never_panics(claims in claims_strategy()) {
        let mapper = RoleMapper::new(role_mappings());
        let result = mapper.determine(&claims);

        if result.mapping_failed {
            prop_assert!(result.permissions.is_empty());
            prop_assert!(result.scopes.is_empty());
        }
    }
}

fn unassigned_result() -> RoleMapResult {
    RoleMapResult {
        primary_role: "unassigned".to_string(),
        custom_roles: HashSet::new(),
        permissions: HashSet::new(),
        scopes: HashSet::new(),
        mapping_failed: true,
        failure_reason: Some("no configured role indicator matched".to_string()),
    }
}

fn assigned_result(role: &str) -> RoleMapResult {
    RoleMapResult {
        primary_role: role.to_string(),
        custom_roles: HashSet::new(),
        permissions: HashSet::new(),
        scopes: HashSet::new(),
        mapping_failed: false,
        failure_reason: None,
    }
}

fn base_session(version: u32, rejected: bool) -> Session {
    let claims = Claims {
        standard: StandardClaims {
            iss: Some("https://idp.test".to_string()),
            sub: Some("user-1".to_string()),
            ..Default::default()
        },
        raw: serde_json::Map::new(),
        access_token: "t".to_string(),
    };
    let manager = SessionManager::new();
    let role_result = if rejected {
        unassigned_result()
    } else {
        assigned_result("user")
    };
    let mut session = manager.create(claims, role_result).expect("valid session");
    session.version = version;
    session.created_at = SystemTime::now();
    session
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: once a session is at `SESSION_VERSION`, `migrate` is a no-op
    /// fixed point: `migrate(migrate(x)) == migrate(x)` on every observable field.
    #[test]
    fn prop_migrate_is_fixed_point_for_current_version(rejected in any::<bool>()) {
        let manager = SessionManager::new();
        let session = base_session(SESSION_VERSION, rejected);

        let once = manager.migrate(session.clone());
        let twice = manager.migrate(once.clone());

        prop_assert_eq!(once.version, twice.version);
        prop_assert_eq!(once.rejected, twice.rejected);
        prop_assert_eq!(once.primary_role.clone(), twice.primary_role.clone());
        prop_assert_eq!(once.permissions.clone(), twice.permissions.clone());
        prop_assert_eq!(once.scopes.clone(), twice.scopes.clone());
        prop_assert_eq!(once.issuer.clone(), twice.issuer.clone());
    }

    /// Property: migrating a legacy (pre-version) record always lands on
    /// `SESSION_VERSION` with `rejected` derived solely from `primary_role`.
    #[test]
    fn prop_migrate_derives_rejected_from_role_for_legacy_records(rejected in any::<bool>()) {
        let manager = SessionManager::new();
        let mut session = base_session(SESSION_VERSION, rejected);
        session.version = 0;
        session.issuer = String::new();

        let migrated = manager.migrate(session);

        prop_assert_eq!(migrated.version, SESSION_VERSION);
        prop_assert_eq!(migrated.issuer, "unknown".to_string());
        prop_assert_eq!(migrated.rejected, rejected);
        if rejected {
            prop_assert!(migrated.permissions.is_empty());
            prop_assert!(migrated.scopes.is_empty());
        }
    }
}
