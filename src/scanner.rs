//! Lazy, restartable key-ordered scan over the primary collection.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::{CollectionNames, TimeRange};
use crate::data::DocumentRow;
use crate::errors::AuditError;
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::store::{DocumentStore, ScanRequest};
use crate::types::DocumentKey;

/// Streams primary rows with key strictly greater than a starting cursor.
///
/// Rows are fetched one page at a time; a page fetch is the only place the
/// iterator blocks. Keys must arrive strictly ascending. A store that breaks
/// that order ends the scan with `CollectionInconsistent`, because a resumed
/// run could otherwise skip or repeat rows.
pub struct CursorScanner<'a> {
    store: &'a dyn DocumentStore,
    names: &'a CollectionNames,
    range: TimeRange,
    page_size: usize,
    retry: RetryConfig,
    last_fetched: Option<DocumentKey>,
    buffer: VecDeque<DocumentRow>,
    exhausted: bool,
    failed: bool,
    pages_fetched: u64,
}

impl<'a> CursorScanner<'a> {
    /// Start a scan after `resume_after` (or at the beginning when `None`).
    pub fn new(
        store: &'a dyn DocumentStore,
        names: &'a CollectionNames,
        resume_after: Option<DocumentKey>,
        range: TimeRange,
        page_size: usize,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            names,
            range,
            page_size: page_size.max(1),
            retry,
            last_fetched: resume_after,
            buffer: VecDeque::new(),
            exhausted: false,
            failed: false,
            pages_fetched: 0,
        }
    }

    /// Number of page fetches issued so far.
    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    fn fetch_page(&mut self) -> Result<(), AuditError> {
        let request = ScanRequest {
            collection: &self.names.primary,
            after: self.last_fetched.as_deref(),
            time_field: &self.names.timestamp_field,
            range: self.range,
            limit: self.page_size,
        };
        let store = self.store;
        let documents = retry_with_backoff(
            self.retry,
            || store.scan_page(&request),
            AuditError::is_transient,
        )?;
        self.pages_fetched += 1;
        if documents.len() < self.page_size {
            self.exhausted = true;
        }
        debug!(
            "[crossref:scan] page {} after={:?} rows={}",
            self.pages_fetched,
            self.last_fetched,
            documents.len()
        );
        for document in &documents {
            if let Some(previous) = self.last_fetched.as_deref()
                && document.key.as_str() <= previous
            {
                return Err(AuditError::CollectionInconsistent {
                    collection: self.names.primary.clone(),
                    details: format!(
                        "scan returned key '{}' after '{}'; keys must be strictly ascending",
                        document.key, previous
                    ),
                });
            }
            self.last_fetched = Some(document.key.clone());
            self.buffer
                .push_back(DocumentRow::from_document(document, self.names));
        }
        Ok(())
    }
}

impl Iterator for CursorScanner<'_> {
    type Item = Result<DocumentRow, AuditError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch_page() {
                self.failed = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
