//! Reference index: auxiliary collections loaded fully into memory before scanning.

use std::collections::HashMap;
use std::time::Instant;

use tracing::info;

use crate::config::CollectionNames;
use crate::data::{Document, RepositoryAttrs};
use crate::errors::AuditError;
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::store::DocumentStore;
use crate::types::RepositoryId;

/// Immutable, run-scoped id → attribute maps built once at start.
#[derive(Clone, Debug, Default)]
pub struct ReferenceIndex {
    repositories: HashMap<RepositoryId, RepositoryAttrs>,
}

impl ReferenceIndex {
    /// Build an index from already-decoded repository attributes.
    pub fn from_repositories<I>(repositories: I) -> Self
    where
        I: IntoIterator<Item = (RepositoryId, RepositoryAttrs)>,
    {
        Self {
            repositories: repositories.into_iter().collect(),
        }
    }

    /// Look up one repository.
    pub fn repository(&self, id: &str) -> Option<&RepositoryAttrs> {
        self.repositories.get(id)
    }

    /// Number of repositories held.
    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    /// True when no repositories were loaded.
    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}

/// Builds the [`ReferenceIndex`] from a store.
///
/// Any failure is fatal to the run; there is no partial index mode.
pub struct ReferenceIndexLoader<'a> {
    store: &'a dyn DocumentStore,
    names: &'a CollectionNames,
    retry: RetryConfig,
}

impl<'a> ReferenceIndexLoader<'a> {
    /// Create a loader reading the collections named in `names`.
    pub fn new(store: &'a dyn DocumentStore, names: &'a CollectionNames) -> Self {
        Self {
            store,
            names,
            retry: RetryConfig::default(),
        }
    }

    /// Override the retry policy for collection loads.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Load every auxiliary collection into memory.
    pub fn load(&self) -> Result<ReferenceIndex, AuditError> {
        let started = Instant::now();
        let repositories = load_table(self.store, self.retry, &self.names.repositories, |doc| {
            RepositoryAttrs::from_document(doc, self.names)
        })?;
        let index = ReferenceIndex { repositories };
        info!(
            "[crossref:refs] loaded {} repositories from '{}' in {:.2}s",
            index.len(),
            self.names.repositories,
            started.elapsed().as_secs_f64()
        );
        Ok(index)
    }
}

fn load_table<T>(
    store: &dyn DocumentStore,
    retry: RetryConfig,
    collection: &str,
    decode: impl Fn(&Document) -> T,
) -> Result<HashMap<String, T>, AuditError> {
    let documents = retry_with_backoff(
        retry,
        || store.load_collection(collection),
        AuditError::is_transient,
    )
    .map_err(|err| AuditError::ReferenceLoad {
        collection: collection.to_string(),
        reason: err.to_string(),
    })?;
    let mut table = HashMap::with_capacity(documents.len());
    for document in &documents {
        table.insert(document.key.clone(), decode(document));
    }
    Ok(table)
}
