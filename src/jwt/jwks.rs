//! JWKS fetching and caching (§3 "JWKS Cache Entry", §4.2, §5).
//!
//! One [`JwksClient`] per `jwks_uri`. Concurrent misses coalesce into a single
//! outbound fetch via a `tokio::sync::Mutex` held across the fetch future — this is a
//! real single-flight guard, not just a cooldown (see DESIGN.md on the teacher's
//! cooldown-only `JwksClient::refresh`).

use jsonwebtoken::jwk::JwkSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};

const DEFAULT_TTL: Duration = Duration::from_secs(600);
const KID_MISS_COOLDOWN: Duration = Duration::from_secs(60);
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: JwkSet,
    cached_at: SystemTime,
    ttl: Duration,
}

impl CachedJwks {
    fn is_fresh(&self) -> bool {
        SystemTime::now()
            .duration_since(self.cached_at)
            .map(|age| age < self.ttl)
            .unwrap_or(false)
    }
}

/// Fetches and caches the JWKS document for a single `jwks_uri`.
#[derive(Debug, Clone)]
pub struct JwksClient {
    jwks_uri: String,
    cache: Arc<RwLock<Option<CachedJwks>>>,
    http_client: reqwest::Client,
    cache_ttl_ceiling: Duration,
    /// Held across an in-flight fetch so concurrent kid-misses share one request.
    fetch_guard: Arc<Mutex<()>>,
    last_kid_miss_refresh: Arc<RwLock<Option<SystemTime>>>,
}

impl JwksClient {
    pub fn new(jwks_uri: impl Into<String>) -> Self {
        Self::with_ttl_ceiling(jwks_uri, DEFAULT_TTL)
    }

    pub fn with_ttl_ceiling(jwks_uri: impl Into<String>, ttl_ceiling: Duration) -> Self {
        Self {
            jwks_uri: jwks_uri.into(),
            cache: Arc::new(RwLock::new(None)),
            http_client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .expect("reqwest client builds with static config"),
            cache_ttl_ceiling: ttl_ceiling,
            fetch_guard: Arc::new(Mutex::new(())),
            last_kid_miss_refresh: Arc::new(RwLock::new(None)),
        }
    }

    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Returns the cached JWKS if fresh, otherwise fetches and caches a fresh copy.
    pub async fn get(&self) -> CoreResult<JwkSet> {
        if let Some(jwks) = self.cached_if_fresh().await {
            return Ok(jwks);
        }
        self.fetch_and_cache().await
    }

    /// Look up a key by `kid`. On miss, force a refresh at most once per
    /// [`KID_MISS_COOLDOWN`]; within the cooldown, a repeated miss fails fast with
    /// `UNKNOWN_KEY` rather than hammering the IDP.
    pub async fn find(&self, kid: &str) -> CoreResult<jsonwebtoken::jwk::Jwk> {
        let jwks = self.get().await?;
        if let Some(key) = jwks.find(kid) {
            return Ok(key.clone());
        }

        let should_refresh = {
            let last = self.last_kid_miss_refresh.read().await;
            match *last {
                Some(t) => SystemTime::now()
                    .duration_since(t)
                    .map(|age| age >= KID_MISS_COOLDOWN)
                    .unwrap_or(true),
                None => true,
            }
        };

        if !should_refresh {
            return Err(CoreError::UnknownKey(kid.to_string()));
        }

        {
            let mut last = self.last_kid_miss_refresh.write().await;
            *last = Some(SystemTime::now());
        }

        let jwks = self.fetch_and_cache().await?;
        jwks.find(kid)
            .cloned()
            .ok_or_else(|| CoreError::UnknownKey(kid.to_string()))
    }

    async fn cached_if_fresh(&self) -> Option<JwkSet> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|c| c.is_fresh())
            .map(|c| c.jwks.clone())
    }

    async fn fetch_and_cache(&self) -> CoreResult<JwkSet> {
        let _guard = self.fetch_guard.lock().await;

        // Another task may have refreshed while we waited for the guard.
        if let Some(jwks) = self.cached_if_fresh().await {
            return Ok(jwks);
        }

        if !self.jwks_uri.starts_with("https://") && !self.jwks_uri.starts_with("http://localhost")
        {
            return Err(CoreError::ConfigInvalid(format!(
                "jwks_uri must be HTTPS: {}",
                self.jwks_uri
            )));
        }

        info!(jwks_uri = %self.jwks_uri, "fetching JWKS");

        let response = self.http_client.get(&self.jwks_uri).send().await;
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(jwks_uri = %self.jwks_uri, error = %e, "JWKS fetch failed");
                return Err(CoreError::JwksUnavailable(e.to_string()));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            warn!(jwks_uri = %self.jwks_uri, %status, "JWKS endpoint returned error status");
            return Err(CoreError::JwksUnavailable(format!("status {status}")));
        }

        let ttl = response
            .headers()
            .get(http::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age)
            .map(|secs| Duration::from_secs(secs).min(self.cache_ttl_ceiling))
            .unwrap_or(self.cache_ttl_ceiling);

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| CoreError::JwksUnavailable(format!("invalid JWKS document: {e}")))?;

        let jwks = filter_signing_keys(jwks);

        debug!(jwks_uri = %self.jwks_uri, key_count = jwks.keys.len(), "cached fresh JWKS");

        let mut cache = self.cache.write().await;
        *cache = Some(CachedJwks {
            jwks: jwks.clone(),
            cached_at: SystemTime::now(),
            ttl,
        });

        Ok(jwks)
    }

    #[cfg(test)]
    pub async fn clear_cache(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
    }
}

/// Only `use in {"sig", absent}` and `kty in {"RSA", "EC"}` keys are acceptable (§6).
fn filter_signing_keys(jwks: JwkSet) -> JwkSet {
    use jsonwebtoken::jwk::{AlgorithmParameters, PublicKeyUse};

    let keys = jwks
        .keys
        .into_iter()
        .filter(|k| {
            let use_ok = matches!(
                k.common.public_key_use,
                None | Some(PublicKeyUse::Signature)
            );
            let kty_ok = matches!(
                k.algorithm,
                AlgorithmParameters::RSA(_) | AlgorithmParameters::EllipticCurve(_)
            );
            use_ok && kty_ok
        })
        .collect();
    JwkSet { keys }
}

fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control
        .split(',')
        .map(str::trim)
        .find_map(|directive| directive.strip_prefix("max-age="))
        .and_then(|v| v.parse().ok())
}
