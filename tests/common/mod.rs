#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossref_audit::{
    AuditConfig, AuditError, Document, DocumentKey, DocumentStore, InMemoryStore, RetryConfig,
    ScanRequest,
};
use serde_json::json;

/// Three rows: one consistent, one mismatch, one without linking data.
pub fn scenario_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    for (key, repository, item) in [("D1", "R1", "I1"), ("D2", "R1", "I2"), ("D3", "R2", "I3")] {
        store
            .insert("documents", key, json!({"repository": repository, "item": item}))
            .expect("insert document");
    }
    store
        .insert("repositories", "R1", json!({"body": "bodyA"}))
        .expect("insert repository");
    store
        .insert("repositories", "R2", json!({"body": "bodyB"}))
        .expect("insert repository");
    store
        .insert("items", "I1", json!({"bodies": ["bodyA"]}))
        .expect("insert item");
    store
        .insert("items", "I2", json!({"bodies": ["bodyB"]}))
        .expect("insert item");
    store
}

/// Deterministic dataset mixing every classification outcome, duplicate items,
/// and timestamps spread over January 2024.
pub fn mixed_store(rows: usize) -> InMemoryStore {
    let store = InMemoryStore::new();
    store
        .insert("repositories", "R0", json!({"body": "b0"}))
        .expect("insert repository");
    store
        .insert("repositories", "R1", json!({"body": "b1"}))
        .expect("insert repository");
    store
        .insert("repositories", "R3", json!({"name": "no body"}))
        .expect("insert repository");
    for item in 0..12 {
        let bodies = match item % 4 {
            0 => json!([]),
            1 => json!(["b0"]),
            2 => json!(["b1"]),
            _ => json!(["b0", "b1"]),
        };
        store
            .insert("items", format!("I{item}"), json!({"bodies": bodies}))
            .expect("insert item");
    }
    for idx in 0..rows {
        let mut body = json!({
            "createdAt": format!("2024-01-{:02}T08:00:00Z", 1 + idx % 28),
        });
        match idx % 7 {
            0 => {}
            1 => body["repository"] = json!("R404"),
            2 => body["repository"] = json!("R3"),
            _ => body["repository"] = json!(format!("R{}", idx % 2)),
        }
        if idx % 11 != 5 {
            body["item"] = json!(format!("I{}", idx % 13));
        }
        store
            .insert("documents", format!("doc_{idx:04}"), body)
            .expect("insert document");
    }
    store
}

/// Small batches and pages so tests cross many boundaries.
pub fn test_config(dir: &Path) -> AuditConfig {
    AuditConfig {
        page_size: 4,
        checkpoint_every_batches: 1,
        sample_cap: 10,
        retry: RetryConfig::none(),
        checkpoint_path: dir.join("state").join("checkpoint.json"),
        report_path: dir.join("reports").join("audit.md"),
        ..AuditConfig::default().with_batch_key_threshold(3)
    }
}

/// Store wrapper injecting failures.
///
/// The first `busy_scans` page fetches fail as busy. Lookups from index
/// `fail_lookup_at` on fail permanently.
pub struct FlakyStore {
    pub inner: InMemoryStore,
    busy_scans: AtomicUsize,
    fail_lookup_at: Option<usize>,
    lookups: AtomicUsize,
    scans: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            busy_scans: AtomicUsize::new(0),
            fail_lookup_at: None,
            lookups: AtomicUsize::new(0),
            scans: AtomicUsize::new(0),
        }
    }

    pub fn with_busy_scans(self, count: usize) -> Self {
        self.busy_scans.store(count, Ordering::SeqCst);
        self
    }

    pub fn failing_lookups_from(mut self, index: usize) -> Self {
        self.fail_lookup_at = Some(index);
        self
    }

    pub fn scan_calls(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl DocumentStore for FlakyStore {
    fn scan_page(&self, request: &ScanRequest<'_>) -> Result<Vec<Document>, AuditError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let remaining = self.busy_scans.load(Ordering::SeqCst);
        if remaining > 0 {
            self.busy_scans.store(remaining - 1, Ordering::SeqCst);
            return Err(AuditError::StoreBusy {
                collection: request.collection.to_string(),
                reason: "database is locked".into(),
            });
        }
        self.inner.scan_page(request)
    }

    fn find_by_keys(
        &self,
        collection: &str,
        keys: &[DocumentKey],
    ) -> Result<Vec<Document>, AuditError> {
        let call = self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookup_at.is_some_and(|at| call >= at) {
            return Err(AuditError::CollectionUnavailable {
                collection: collection.to_string(),
                reason: "connection reset".into(),
            });
        }
        self.inner.find_by_keys(collection, keys)
    }

    fn load_collection(&self, collection: &str) -> Result<Vec<Document>, AuditError> {
        self.inner.load_collection(collection)
    }
}
