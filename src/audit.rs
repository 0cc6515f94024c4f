//! Append-only audit sink (C1, §4.1).
//!
//! [`NoopAuditService`] is the default so call sites never need an `if audit_enabled`
//! branch. [`InMemoryAuditService`] additionally keeps a bounded ring buffer that can
//! be queried and cleared, with an optional overflow callback invoked on eviction.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::SystemTime;

use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AuditConfig;

const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// One audit record. `source` is mandatory on every entry (invariant 2, §8).
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: SystemTime,
    pub source: String,
    pub user_id: Option<String>,
    pub action: String,
    pub success: bool,
    pub metadata: serde_json::Map<String, Value>,
    pub error: Option<String>,
}

impl AuditEntry {
    pub fn new(source: impl Into<String>, action: impl Into<String>, success: bool) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp: SystemTime::now(),
            source: source.into(),
            user_id: None,
            action: action.into(),
            success,
            metadata: serde_json::Map::new(),
            error: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    fn emit_trace(&self) {
        let group = match self.source.split(':').next() {
            Some(ns) => format!("audit::{ns}"),
            None => "audit".to_string(),
        };

        if self.success {
            info!(
                target: "audit",
                audit_id = %self.id,
                source = %self.source,
                action = %self.action,
                user_id = ?self.user_id,
                group = %group,
                "audit event"
            );
        } else if self.error.is_some() {
            error!(
                target: "audit",
                audit_id = %self.id,
                source = %self.source,
                action = %self.action,
                user_id = ?self.user_id,
                error = ?self.error,
                group = %group,
                "audit event failed"
            );
        } else {
            warn!(
                target: "audit",
                audit_id = %self.id,
                source = %self.source,
                action = %self.action,
                user_id = ?self.user_id,
                group = %group,
                "audit event unsuccessful"
            );
        }
    }
}

/// Filter applied by [`AuditService::query`].
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub source_prefix: Option<String>,
    pub user_id: Option<String>,
    pub success: Option<bool>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(prefix) = &self.source_prefix
            && !entry.source.starts_with(prefix.as_str())
        {
            return false;
        }
        if let Some(user_id) = &self.user_id
            && entry.user_id.as_deref() != Some(user_id.as_str())
        {
            return false;
        }
        if let Some(success) = self.success
            && entry.success != success
        {
            return false;
        }
        true
    }
}

/// Append-only event sink. No method may block on I/O — implementations that fan out to
/// external sinks must do so without blocking `log`.
pub trait AuditService: Send + Sync + std::fmt::Debug {
    fn log(&self, entry: AuditEntry);
    fn query(&self, filter: AuditFilter) -> Vec<AuditEntry>;
    fn clear(&self);
}

/// Default audit service: every method succeeds and stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditService;

impl AuditService for NoopAuditService {
    fn log(&self, entry: AuditEntry) {
        entry.emit_trace();
    }

    fn query(&self, _filter: AuditFilter) -> Vec<AuditEntry> {
        Vec::new()
    }

    fn clear(&self) {}
}

/// An event evicted from the bounded ring buffer due to overflow.
pub type OverflowCallback = Box<dyn Fn(&AuditEntry) + Send + Sync>;

/// Bounded in-memory audit store, FIFO eviction once `max_entries` is reached.
pub struct InMemoryAuditService {
    max_entries: usize,
    entries: Mutex<VecDeque<AuditEntry>>,
    overflow: Option<OverflowCallback>,
}

impl std::fmt::Debug for InMemoryAuditService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryAuditService")
            .field("max_entries", &self.max_entries)
            .field("len", &self.entries.lock().unwrap().len())
            .finish()
    }
}

impl InMemoryAuditService {
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            max_entries: config.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES),
            entries: Mutex::new(VecDeque::new()),
            overflow: None,
        }
    }

    pub fn with_overflow_callback(mut self, callback: OverflowCallback) -> Self {
        self.overflow = Some(callback);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditService for InMemoryAuditService {
    fn log(&self, entry: AuditEntry) {
        entry.emit_trace();

        let mut entries = self.entries.lock().unwrap();
        entries.push_back(entry);
        while entries.len() > self.max_entries {
            if let Some(evicted) = entries.pop_front()
                && let Some(callback) = &self.overflow
            {
                callback(&evicted);
            }
        }
    }

    fn query(&self, filter: AuditFilter) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

/// Build an [`AuditService`] from config: no-op when disabled, bounded in-memory store
/// otherwise.
pub fn build_audit_service(config: &AuditConfig) -> std::sync::Arc<dyn AuditService> {
    if config.enabled {
        std::sync::Arc::new(InMemoryAuditService::new(config))
    } else {
        std::sync::Arc::new(NoopAuditService)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_service_stores_nothing() {
        let svc = NoopAuditService;
        svc.log(AuditEntry::new("auth:service", "authenticate_success", true));
        assert!(svc.query(AuditFilter::default()).is_empty());
    }

    #[test]
    fn in_memory_service_stores_and_filters() {
        let svc = InMemoryAuditService::new(&AuditConfig {
            enabled: true,
            max_entries: Some(10),
        });
        svc.log(AuditEntry::new("auth:service", "authenticate_success", true).with_user("u1"));
        svc.log(AuditEntry::new("delegation:registry", "delegate", false).with_user("u1"));

        let auth_only = svc.query(AuditFilter {
            source_prefix: Some("auth:".to_string()),
            ..Default::default()
        });
        assert_eq!(auth_only.len(), 1);
        assert_eq!(auth_only[0].action, "authenticate_success");
    }

    #[test]
    fn bounded_store_evicts_oldest_and_invokes_callback() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let evicted_count = Arc::new(AtomicUsize::new(0));
        let counter = evicted_count.clone();

        let svc = InMemoryAuditService::new(&AuditConfig {
            enabled: true,
            max_entries: Some(2),
        })
        .with_overflow_callback(Box::new(move |_entry| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        for i in 0..5 {
            svc.log(AuditEntry::new("auth:service", format!("event-{i}"), true));
        }

        assert_eq!(svc.len(), 2);
        assert_eq!(evicted_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn clear_empties_the_store() {
        let svc = InMemoryAuditService::new(&AuditConfig {
            enabled: true,
            max_entries: Some(10),
        });
        svc.log(AuditEntry::new("auth:service", "authenticate_success", true));
        svc.clear();
        assert!(svc.is_empty());
    }
}
