//! Row batching bounded by distinct foreign keys.

use indexmap::IndexSet;

use crate::data::DocumentRow;
use crate::types::{DocumentKey, ItemId};

/// Ordered rows plus the distinct item keys they reference.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    rows: Vec<DocumentRow>,
    keys: IndexSet<ItemId>,
}

impl Batch {
    /// Rows in scan order.
    pub fn rows(&self) -> &[DocumentRow] {
        &self.rows
    }

    /// Distinct item keys in first-seen order.
    pub fn keys(&self) -> &IndexSet<ItemId> {
        &self.keys
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Key of the last row; the cursor to persist once this batch is aggregated.
    pub fn last_key(&self) -> Option<&DocumentKey> {
        self.rows.last().map(|row| &row.key)
    }
}

/// Buffers rows until a flush condition is met.
///
/// A batch is emitted when its distinct item keys reach `key_threshold` (the
/// row that reaches it is the last row included) or when it holds `max_rows`
/// rows. [`BatchAccumulator::drain`] emits the final partial batch. Empty
/// batches are never emitted.
#[derive(Debug)]
pub struct BatchAccumulator {
    key_threshold: usize,
    max_rows: usize,
    current: Batch,
}

impl BatchAccumulator {
    /// Create an accumulator. Zero limits are clamped to one.
    pub fn new(key_threshold: usize, max_rows: usize) -> Self {
        let key_threshold = key_threshold.max(1);
        Self {
            key_threshold,
            max_rows: max_rows.max(key_threshold),
            current: Batch::default(),
        }
    }

    /// Absorb one row, returning a completed batch when a limit is reached.
    pub fn push(&mut self, row: DocumentRow) -> Option<Batch> {
        if let Some(key) = row.item_key() {
            self.current.keys.insert(key.to_string());
        }
        self.current.rows.push(row);
        if self.current.keys.len() >= self.key_threshold || self.current.rows.len() >= self.max_rows
        {
            return Some(std::mem::take(&mut self.current));
        }
        None
    }

    /// Emit whatever is buffered once input is exhausted.
    pub fn drain(&mut self) -> Option<Batch> {
        if self.current.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.current))
    }
}
