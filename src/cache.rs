//! Encrypted, session-scoped delegation-token cache (C7, §4.7).
//!
//! Ground: AES-256-GCM envelope shape from `sujan174-Ai-Link/gateway/src/vault/builtin.rs`
//! (`Aes256Gcm::new_from_slice` + random nonce), extended here with an `aead::Payload`
//! associated-data binding so a cached ciphertext can only be opened by whoever presents
//! the exact subject token that produced the session. The zeroize-on-drop session key
//! follows the pattern of `devolutions-gateway`'s credential-handling modules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::config::CacheConfig;

const NONCE_LEN: usize = 12;
const SESSION_ID_PREFIX_LEN: usize = 16;

/// Abstraction over the delegation-token cache so [`crate::token_exchange::TokenExchangeService`]
/// doesn't need to know whether caching is enabled.
#[async_trait]
pub trait TokenCache: Send + Sync + std::fmt::Debug {
    /// Derive/refresh a session id for this subject token and return it.
    async fn activate(&self, subject_access_token: &str) -> String;

    async fn get(&self, session_id: &str, audience: &str, subject_access_token: &str) -> Option<String>;

    async fn put(
        &self,
        session_id: &str,
        audience: &str,
        plaintext_token: &str,
        token_exp: SystemTime,
        subject_access_token: &str,
    );

    async fn clear_session(&self, session_id: &str);

    fn metrics(&self) -> CacheMetrics;
}

/// Exported counters. Never logged alongside token material.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub decryption_failures: u64,
    pub evictions: u64,
    pub active_sessions: usize,
    pub entries_total: usize,
    pub approx_memory_bytes: usize,
}

/// Default cache when the feature is not explicitly enabled: `activate` returns a
/// stable dummy id, `put` discards, `get` always misses. No conditionals needed at call
/// sites.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTokenCache;

#[async_trait]
impl TokenCache for NoopTokenCache {
    async fn activate(&self, _subject_access_token: &str) -> String {
        "noop".to_string()
    }

    async fn get(&self, _session_id: &str, _audience: &str, _subject_access_token: &str) -> Option<String> {
        None
    }

    async fn put(
        &self,
        _session_id: &str,
        _audience: &str,
        _plaintext_token: &str,
        _token_exp: SystemTime,
        _subject_access_token: &str,
    ) {
    }

    async fn clear_session(&self, _session_id: &str) {}

    fn metrics(&self) -> CacheMetrics {
        CacheMetrics::default()
    }
}

struct CacheEntry {
    ciphertext: Vec<u8>,
    nonce: [u8; NONCE_LEN],
    stored_at: SystemTime,
    expires_at: SystemTime,
    last_used: SystemTime,
}

impl CacheEntry {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at <= now
    }
}

struct SessionRecord {
    session_key: [u8; 32],
    last_heartbeat: SystemTime,
    /// audience -> entry
    entries: HashMap<String, CacheEntry>,
}

impl Drop for SessionRecord {
    fn drop(&mut self) {
        self.session_key.zeroize();
    }
}

/// Estimate an entry's retained footprint: the struct itself plus its heap-allocated
/// ciphertext. Counted and retracted at insert/evict time so `metrics()` never needs
/// to walk every session.
fn entry_memory_size(entry: &CacheEntry) -> usize {
    std::mem::size_of::<CacheEntry>() + entry.ciphertext.len()
}

/// AES-256-GCM-sealed, session-keyed cache. See module docs for the AAD binding.
///
/// The four exported counters (§4.7 "Metrics") and the running entry/byte totals are
/// plain `Atomic*` fields rather than living behind the async session lock, so
/// [`TokenCache::metrics`] can be a sync fn callable from anywhere — including a
/// metrics-scrape handler that must not await.
pub struct EncryptedTokenCache {
    config: CacheConfig,
    sessions: RwLock<HashMap<String, Mutex<SessionRecord>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    decryption_failures: AtomicU64,
    evictions: AtomicU64,
    /// Tracks entries across all sessions so the global cap (§4.7 "Store") can be
    /// enforced without awaiting every per-session lock on the hot path.
    total_entries: AtomicUsize,
    total_bytes: AtomicUsize,
}

impl std::fmt::Debug for EncryptedTokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedTokenCache")
            .field("config", &self.config)
            .finish()
    }
}

impl EncryptedTokenCache {
    pub fn new(config: CacheConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            decryption_failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            total_entries: AtomicUsize::new(0),
            total_bytes: AtomicUsize::new(0),
        })
    }

    fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_seconds)
    }

    fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.config.session_timeout_seconds)
    }

    /// Remove session records whose heartbeat has expired. Intended to run on a timer
    /// (`session_timeout / 4` per §5); exposed here as a plain method the orchestrator
    /// or a `tokio::time::interval` loop can drive.
    pub async fn sweep_expired_sessions(&self) {
        let now = SystemTime::now();
        let timeout = self.session_timeout();
        let mut sessions = self.sessions.write().await;
        let mut expired: Vec<String> = Vec::new();
        let mut freed_entries: usize = 0;
        let mut freed_bytes: usize = 0;
        for (session_id, record) in sessions.iter() {
            let record = record.lock().await;
            let age = now
                .duration_since(record.last_heartbeat)
                .unwrap_or_default();
            if age >= timeout {
                expired.push(session_id.clone());
                freed_entries += record.entries.len();
                freed_bytes += record.entries.values().map(entry_memory_size).sum::<usize>();
            }
        }
        for session_id in &expired {
            sessions.remove(session_id);
        }
        if freed_entries > 0 {
            self.total_entries.fetch_sub(freed_entries, Ordering::SeqCst);
            self.total_bytes.fetch_sub(freed_bytes, Ordering::SeqCst);
        }
        if !expired.is_empty() {
            self.evictions.fetch_add(expired.len() as u64, Ordering::SeqCst);
            debug!(count = expired.len(), "swept expired cache sessions");
        }
    }
}

#[async_trait]
impl TokenCache for EncryptedTokenCache {
    async fn activate(&self, subject_access_token: &str) -> String {
        let session_id = session_id_for(subject_access_token);
        let now = SystemTime::now();

        {
            let sessions = self.sessions.read().await;
            if let Some(record) = sessions.get(&session_id) {
                record.lock().await.last_heartbeat = now;
                return session_id;
            }
        }

        let mut sessions = self.sessions.write().await;
        sessions.entry(session_id.clone()).or_insert_with(|| {
            let mut session_key = [0u8; 32];
            OsRng.fill_bytes(&mut session_key);
            Mutex::new(SessionRecord {
                session_key,
                last_heartbeat: now,
                entries: HashMap::new(),
            })
        });
        session_id
    }

    async fn get(&self, session_id: &str, audience: &str, subject_access_token: &str) -> Option<String> {
        let now = SystemTime::now();
        let sessions = self.sessions.read().await;
        let Some(record_lock) = sessions.get(session_id) else {
            self.misses.fetch_add(1, Ordering::SeqCst);
            return None;
        };
        let mut record = record_lock.lock().await;

        let Some(entry) = record.entries.get(audience) else {
            drop(record);
            self.misses.fetch_add(1, Ordering::SeqCst);
            return None;
        };
        if entry.is_expired(now) {
            drop(record);
            self.misses.fetch_add(1, Ordering::SeqCst);
            return None;
        }

        let aad = full_hash(subject_access_token);
        let cipher = match Aes256Gcm::new_from_slice(&record.session_key) {
            Ok(c) => c,
            Err(_) => return None,
        };
        let nonce = Nonce::from_slice(&entry.nonce);
        let payload = Payload {
            msg: &entry.ciphertext,
            aad: &aad,
        };

        match cipher.decrypt(nonce, payload) {
            Ok(plaintext) => {
                if let Some(entry) = record.entries.get_mut(audience) {
                    entry.last_used = now;
                }
                drop(record);
                self.hits.fetch_add(1, Ordering::SeqCst);
                String::from_utf8(plaintext).ok()
            }
            Err(_) => {
                // Never surface AEAD failures — caller falls through to a fresh exchange.
                drop(record);
                self.decryption_failures.fetch_add(1, Ordering::SeqCst);
                warn!(session_id = %session_id, "cache entry failed AEAD decryption");
                None
            }
        }
    }

    async fn put(
        &self,
        session_id: &str,
        audience: &str,
        plaintext_token: &str,
        token_exp: SystemTime,
        subject_access_token: &str,
    ) {
        let now = SystemTime::now();
        let ttl_ceiling = now + self.max_ttl();
        let expires_at = token_exp.min(ttl_ceiling);
        if expires_at <= now {
            return;
        }

        let sessions = self.sessions.read().await;
        let Some(record_lock) = sessions.get(session_id) else {
            return;
        };
        let mut record = record_lock.lock().await;

        let aad = full_hash(subject_access_token);
        let cipher = match Aes256Gcm::new_from_slice(&record.session_key) {
            Ok(c) => c,
            Err(_) => return,
        };

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let payload = Payload {
            msg: plaintext_token.as_bytes(),
            aad: &aad,
        };

        let Ok(ciphertext) = cipher.encrypt(nonce, payload) else {
            return;
        };
        let new_entry_size = std::mem::size_of::<CacheEntry>() + ciphertext.len();

        let is_new_entry = !record.entries.contains_key(audience);
        let mut evicted = 0usize;
        let mut evicted_bytes = 0usize;

        if is_new_entry && record.entries.len() >= self.config.max_entries_per_session {
            if let Some(lru_key) = record
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                if let Some(removed) = record.entries.remove(&lru_key) {
                    evicted_bytes += entry_memory_size(&removed);
                }
                evicted += 1;
            }
        }

        // Global cap (§4.7 "Store"): once the total across all sessions reaches the
        // configured ceiling, refuse new (session, audience) pairs rather than push an
        // unbounded number of sessions into memory. Overwriting an existing entry for
        // the same audience never grows the total, so it's exempt.
        if is_new_entry
            && evicted == 0
            && self.total_entries.load(Ordering::SeqCst) >= self.config.max_total_entries
        {
            drop(record);
            self.evictions.fetch_add(1, Ordering::SeqCst);
            warn!("global cache entry cap reached; dropping new entry");
            return;
        }

        let replaced = record.entries.insert(
            audience.to_string(),
            CacheEntry {
                ciphertext,
                nonce: nonce_bytes,
                stored_at: now,
                expires_at,
                last_used: now,
            },
        );
        let replaced_bytes = replaced.as_ref().map(entry_memory_size).unwrap_or(0);

        if is_new_entry {
            if evicted > 0 {
                self.total_entries.fetch_sub(evicted, Ordering::SeqCst);
            }
            self.total_entries.fetch_add(1, Ordering::SeqCst);
        }

        let total_freed = evicted_bytes + replaced_bytes;
        if new_entry_size >= total_freed {
            self.total_bytes
                .fetch_add(new_entry_size - total_freed, Ordering::SeqCst);
        } else {
            self.total_bytes
                .fetch_sub(total_freed - new_entry_size, Ordering::SeqCst);
        }
    }

    async fn clear_session(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(record) = sessions.remove(session_id) {
            let record = record.into_inner();
            let freed = record.entries.len();
            if freed > 0 {
                let freed_bytes = record.entries.values().map(entry_memory_size).sum::<usize>();
                self.total_entries.fetch_sub(freed, Ordering::SeqCst);
                self.total_bytes.fetch_sub(freed_bytes, Ordering::SeqCst);
            }
        }
    }

    fn metrics(&self) -> CacheMetrics {
        let active_sessions = self.sessions.try_read().map(|s| s.len()).unwrap_or(0);

        CacheMetrics {
            hits: self.hits.load(Ordering::SeqCst),
            misses: self.misses.load(Ordering::SeqCst),
            decryption_failures: self.decryption_failures.load(Ordering::SeqCst),
            evictions: self.evictions.load(Ordering::SeqCst),
            active_sessions,
            entries_total: self.total_entries.load(Ordering::SeqCst),
            approx_memory_bytes: self.total_bytes.load(Ordering::SeqCst),
        }
    }
}

fn session_id_for(subject_access_token: &str) -> String {
    let digest = Sha256::digest(subject_access_token.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&digest[..SESSION_ID_PREFIX_LEN])
}

fn full_hash(subject_access_token: &str) -> [u8; 32] {
    Sha256::digest(subject_access_token.as_bytes()).into()
}
