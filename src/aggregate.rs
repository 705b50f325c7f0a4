//! Running counters, per-reason distinct sets, and the capped evidence sample.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::checkpoint::{Checkpoint, CheckpointStatus, ScanScope};
use crate::constants::checkpoint::CHECKPOINT_VERSION;
use crate::detector::{Classification, ExclusionCause, MismatchRecord, ReasonCode};
use crate::types::{DocumentKey, EntityId};

/// Row counters accumulated over the whole scan (all runs).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanTotals {
    /// Rows read from the primary collection and processed in a batch.
    pub scanned: u64,
    /// Rows that reached a verdict (consistent + violations).
    pub classified: u64,
    /// Rows satisfying every rule.
    pub consistent: u64,
    /// Rows violating a rule.
    pub violations: u64,
    /// Rows excluded as undeterminable.
    pub excluded: u64,
}

/// Occurrences and distinct affected entities for one reason code.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonStats {
    /// Violating rows.
    pub count: u64,
    /// Distinct entities affected.
    pub entity_ids: BTreeSet<EntityId>,
}

/// First-N evidence records: first come, no eviction, no re-ranking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleBuffer {
    cap: usize,
    records: Vec<MismatchRecord>,
}

impl SampleBuffer {
    /// Create an empty buffer holding at most `cap` records.
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            records: Vec::new(),
        }
    }

    /// Restore persisted records; anything beyond `cap` is dropped from the tail.
    pub fn restore(cap: usize, mut records: Vec<MismatchRecord>) -> Self {
        records.truncate(cap);
        Self { cap, records }
    }

    /// Append when below the cap. Returns whether the record was kept.
    pub fn offer(&mut self, record: &MismatchRecord) -> bool {
        if self.records.len() >= self.cap {
            return false;
        }
        self.records.push(record.clone());
        true
    }

    /// Retained records in insertion order.
    pub fn records(&self) -> &[MismatchRecord] {
        &self.records
    }

    /// Configured cap.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Records held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no record is held.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Accumulated audit state; the in-memory mirror of a [`Checkpoint`].
#[derive(Clone, Debug)]
pub struct Aggregator {
    totals: ScanTotals,
    reasons: BTreeMap<ReasonCode, ReasonStats>,
    excluded: BTreeMap<ExclusionCause, u64>,
    samples: SampleBuffer,
    last_key: Option<DocumentKey>,
    batches_completed: u64,
}

impl Aggregator {
    /// Fresh state for a scan starting at the beginning of the collection.
    pub fn new(sample_cap: usize) -> Self {
        Self {
            totals: ScanTotals::default(),
            reasons: BTreeMap::new(),
            excluded: BTreeMap::new(),
            samples: SampleBuffer::new(sample_cap),
            last_key: None,
            batches_completed: 0,
        }
    }

    /// Continue from a checkpoint. Counters and sets are restored exactly;
    /// later calls keep accumulating into them.
    pub fn from_checkpoint(checkpoint: Checkpoint, sample_cap: usize) -> Self {
        Self {
            totals: checkpoint.totals,
            reasons: checkpoint.reasons,
            excluded: checkpoint.excluded,
            samples: SampleBuffer::restore(sample_cap, checkpoint.samples),
            last_key: checkpoint.last_key,
            batches_completed: checkpoint.batches_completed,
        }
    }

    /// Record the verdict for one scanned row.
    pub fn observe(&mut self, outcome: Classification) {
        self.totals.scanned += 1;
        match outcome {
            Classification::Consistent => {
                self.totals.classified += 1;
                self.totals.consistent += 1;
            }
            Classification::Violation(record) => {
                self.totals.classified += 1;
                self.apply(record);
            }
            Classification::Undeterminable(cause) => {
                self.totals.excluded += 1;
                *self.excluded.entry(cause).or_insert(0) += 1;
            }
        }
    }

    /// Count one violation, track its entity, and sample it while below the cap.
    pub fn apply(&mut self, record: MismatchRecord) {
        self.totals.violations += 1;
        let stats = self.reasons.entry(record.reason).or_default();
        stats.count += 1;
        if !stats.entity_ids.contains(record.entity_id()) {
            stats.entity_ids.insert(record.entity_id().clone());
        }
        self.samples.offer(&record);
    }

    /// Mark a batch fully aggregated and advance the cursor to its last key.
    pub fn complete_batch(&mut self, last_key: Option<&DocumentKey>) {
        if let Some(key) = last_key {
            self.last_key = Some(key.clone());
        }
        self.batches_completed += 1;
    }

    /// Serializable snapshot tagged with the scan scope and status.
    pub fn snapshot(&self, scope: ScanScope, status: CheckpointStatus) -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            scope,
            status,
            last_key: self.last_key.clone(),
            batches_completed: self.batches_completed,
            totals: self.totals,
            excluded: self.excluded.clone(),
            reasons: self.reasons.clone(),
            samples: self.samples.records().to_vec(),
        }
    }

    /// Row counters.
    pub fn totals(&self) -> &ScanTotals {
        &self.totals
    }

    /// Per-reason statistics.
    pub fn reasons(&self) -> &BTreeMap<ReasonCode, ReasonStats> {
        &self.reasons
    }

    /// Excluded rows per cause.
    pub fn excluded(&self) -> &BTreeMap<ExclusionCause, u64> {
        &self.excluded
    }

    /// Evidence sample.
    pub fn samples(&self) -> &SampleBuffer {
        &self.samples
    }

    /// Last key of the last fully aggregated batch.
    pub fn last_key(&self) -> Option<&DocumentKey> {
        self.last_key.as_ref()
    }

    /// Batches aggregated across all runs.
    pub fn batches_completed(&self) -> u64 {
        self.batches_completed
    }
}
