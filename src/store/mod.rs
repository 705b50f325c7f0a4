//! Document store interfaces and the in-memory backend.
//!
//! Ownership model:
//! - `DocumentStore` is the engine-facing interface for every collection read.
//! - Backends return raw [`Document`]s; typed projection happens in the
//!   scanner, the reference loader, and the batch resolver.
//! - Stores hold no scan state. The cursor lives in the scanner and the
//!   checkpoint, so one store can serve any number of sequential runs.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use serde_json::Value;

use crate::config::TimeRange;
use crate::data::{Document, parse_timestamp};
use crate::errors::AuditError;
use crate::types::{CollectionName, DocumentKey};

/// Store backend implementations.
pub mod backends;

pub use backends::sqlite_store::SqliteStore;

/// One ranged, sorted page request against the primary collection.
#[derive(Clone, Copy, Debug)]
pub struct ScanRequest<'a> {
    /// Collection to scan.
    pub collection: &'a str,
    /// Return only keys strictly greater than this one.
    pub after: Option<&'a str>,
    /// Field holding the RFC 3339 timestamp used by `range`.
    pub time_field: &'a str,
    /// Timestamp window applied to every returned document.
    pub range: TimeRange,
    /// Maximum documents returned.
    pub limit: usize,
}

/// Read interface over a document database.
///
/// For a fixed store state, `scan_page` must return documents in strictly
/// ascending key order; the checkpoint cursor relies on it.
pub trait DocumentStore: Send + Sync {
    /// Fetch up to `limit` documents with key > `after` inside the time window,
    /// ordered by key ascending.
    fn scan_page(&self, request: &ScanRequest<'_>) -> Result<Vec<Document>, AuditError>;

    /// Keyed bulk lookup ("in-set" query). Unknown keys are simply absent from
    /// the result; order is unspecified.
    fn find_by_keys(
        &self,
        collection: &str,
        keys: &[DocumentKey],
    ) -> Result<Vec<Document>, AuditError>;

    /// Read a whole collection. Only used for small auxiliary collections.
    fn load_collection(&self, collection: &str) -> Result<Vec<Document>, AuditError>;
}

/// In-memory document store for tests and small datasets.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<BTreeMap<CollectionName, BTreeMap<DocumentKey, Value>>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `collection` if it does not exist yet.
    pub fn create_collection(&self, collection: &str) -> Result<(), AuditError> {
        self.collections
            .write()
            .map_err(|_| poisoned(collection))?
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    /// Insert or replace one document, creating the collection on demand.
    pub fn insert(
        &self,
        collection: &str,
        key: impl Into<DocumentKey>,
        body: Value,
    ) -> Result<(), AuditError> {
        self.collections
            .write()
            .map_err(|_| poisoned(collection))?
            .entry(collection.to_string())
            .or_default()
            .insert(key.into(), body);
        Ok(())
    }

    fn with_collection<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&BTreeMap<DocumentKey, Value>) -> T,
    ) -> Result<T, AuditError> {
        let guard = self.collections.read().map_err(|_| poisoned(collection))?;
        let docs = guard
            .get(collection)
            .ok_or_else(|| AuditError::CollectionUnavailable {
                collection: collection.to_string(),
                reason: "collection does not exist".into(),
            })?;
        Ok(f(docs))
    }
}

impl DocumentStore for InMemoryStore {
    fn scan_page(&self, request: &ScanRequest<'_>) -> Result<Vec<Document>, AuditError> {
        let lower = match request.after {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        self.with_collection(request.collection, |docs| {
            docs.range::<str, _>((lower, Bound::Unbounded))
                .filter(|(_, body)| {
                    request
                        .range
                        .contains(parse_timestamp(body.get(request.time_field)))
                })
                .take(request.limit)
                .map(|(key, body)| Document::new(key.clone(), body.clone()))
                .collect()
        })
    }

    fn find_by_keys(
        &self,
        collection: &str,
        keys: &[DocumentKey],
    ) -> Result<Vec<Document>, AuditError> {
        self.with_collection(collection, |docs| {
            keys.iter()
                .filter_map(|key| {
                    docs.get(key)
                        .map(|body| Document::new(key.clone(), body.clone()))
                })
                .collect()
        })
    }

    fn load_collection(&self, collection: &str) -> Result<Vec<Document>, AuditError> {
        self.with_collection(collection, |docs| {
            docs.iter()
                .map(|(key, body)| Document::new(key.clone(), body.clone()))
                .collect()
        })
    }
}

fn poisoned(collection: &str) -> AuditError {
    AuditError::CollectionUnavailable {
        collection: collection.to_string(),
        reason: "store lock poisoned".into(),
    }
}
