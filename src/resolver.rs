//! Per-batch resolution of the tertiary collection.

use std::collections::HashMap;

use tracing::debug;

use crate::batch::Batch;
use crate::config::CollectionNames;
use crate::data::ItemLinks;
use crate::errors::AuditError;
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::store::DocumentStore;
use crate::types::{DocumentKey, ItemId};

/// Item links resolved for one batch only; never merged into the reference index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchResolution {
    items: HashMap<ItemId, ItemLinks>,
}

impl BatchResolution {
    /// Build a resolution from decoded item links.
    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = (ItemId, ItemLinks)>,
    {
        Self {
            items: items.into_iter().collect(),
        }
    }

    /// Links for one item, if it was found.
    pub fn item(&self, id: &str) -> Option<&ItemLinks> {
        self.items.get(id)
    }

    /// Number of items found.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing was found.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Issues exactly one keyed bulk lookup per batch.
pub struct BatchResolver<'a> {
    store: &'a dyn DocumentStore,
    names: &'a CollectionNames,
    retry: RetryConfig,
}

impl<'a> BatchResolver<'a> {
    /// Create a resolver over the items collection named in `names`.
    pub fn new(store: &'a dyn DocumentStore, names: &'a CollectionNames, retry: RetryConfig) -> Self {
        Self {
            store,
            names,
            retry,
        }
    }

    /// Resolve the batch's distinct item keys.
    ///
    /// A batch without keys resolves to an empty map without touching the store.
    pub fn resolve(&self, batch: &Batch) -> Result<BatchResolution, AuditError> {
        if batch.keys().is_empty() {
            return Ok(BatchResolution::default());
        }
        let keys: Vec<DocumentKey> = batch.keys().iter().cloned().collect();
        let store = self.store;
        let collection = self.names.items.as_str();
        let documents = retry_with_backoff(
            self.retry,
            || store.find_by_keys(collection, &keys),
            AuditError::is_transient,
        )?;
        debug!(
            "[crossref:resolve] looked up {} keys in '{}', found {}",
            keys.len(),
            collection,
            documents.len()
        );
        Ok(BatchResolution {
            items: documents
                .iter()
                .filter(|doc| batch.keys().contains(&doc.key))
                .map(|doc| (doc.key.clone(), ItemLinks::from_document(doc, self.names)))
                .collect(),
        })
    }
}
