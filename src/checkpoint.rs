//! Durable, resumable scan state.
//!
//! A checkpoint stores the cursor together with every aggregate in one file,
//! so the persisted aggregates always describe exactly the rows with key up to
//! `lastKey`. Rows aggregated in memory after the last save are simply
//! re-scanned on resume; nothing is counted twice.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::aggregate::{ReasonStats, ScanTotals};
use crate::constants::checkpoint::CHECKPOINT_VERSION;
use crate::detector::{ExclusionCause, MismatchRecord, ReasonCode};
use crate::errors::AuditError;
use crate::types::{CollectionName, DocumentKey, FieldName};

/// Identity of a scan; a checkpoint only resumes a run with the same scope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanScope {
    /// Primary collection.
    pub collection: CollectionName,
    /// Timestamp field the bounds apply to.
    pub time_field: FieldName,
    /// Inclusive lower bound.
    pub start_date: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub end_date: Option<DateTime<Utc>>,
}

/// Whether the scan reached the end of input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckpointStatus {
    /// More rows may remain after `lastKey`.
    InProgress,
    /// Input was exhausted.
    Complete,
}

/// Serialized scan snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Format version.
    pub version: u32,
    /// Scan identity.
    pub scope: ScanScope,
    /// Scan status at save time.
    pub status: CheckpointStatus,
    /// Last key of the last fully aggregated batch.
    pub last_key: Option<DocumentKey>,
    /// Batches aggregated across all runs.
    pub batches_completed: u64,
    /// Row counters.
    pub totals: ScanTotals,
    /// Excluded rows per cause.
    #[serde(default)]
    pub excluded: BTreeMap<ExclusionCause, u64>,
    /// Per-reason occurrences and distinct entity ids.
    pub reasons: BTreeMap<ReasonCode, ReasonStats>,
    /// Evidence sample, first come first kept.
    pub samples: Vec<MismatchRecord>,
}

impl Checkpoint {
    /// Fail unless this checkpoint was written for `scope`.
    pub fn ensure_scope(&self, scope: &ScanScope) -> Result<(), AuditError> {
        if &self.scope == scope {
            return Ok(());
        }
        Err(AuditError::Configuration(format!(
            "checkpoint was written for collection '{}' field '{}' range [{}, {}) but this run \
             scans collection '{}' field '{}' range [{}, {}); remove the checkpoint or restore \
             the original bounds",
            self.scope.collection,
            self.scope.time_field,
            fmt_bound(self.scope.start_date),
            fmt_bound(self.scope.end_date),
            scope.collection,
            scope.time_field,
            fmt_bound(scope.start_date),
            fmt_bound(scope.end_date),
        )))
    }
}

fn fmt_bound(bound: Option<DateTime<Utc>>) -> String {
    bound
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}

/// Persistence backend for checkpoints.
pub trait CheckpointStore: Send + Sync {
    /// Last saved checkpoint, or `None` when none exists.
    fn load(&self) -> Result<Option<Checkpoint>, AuditError>;
    /// Replace the stored checkpoint atomically.
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), AuditError>;
    /// Where checkpoints live, for messages.
    fn location(&self) -> PathBuf;
}

/// JSON file checkpoint store with write-then-replace saves.
#[derive(Clone, Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Store checkpoints at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Checkpoint file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, AuditError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(AuditError::Checkpoint(format!(
                    "failed reading {}: {err}",
                    self.path.display()
                )));
            }
        };
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes).map_err(|err| {
            AuditError::Checkpoint(format!("corrupt checkpoint {}: {err}", self.path.display()))
        })?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(AuditError::Checkpoint(format!(
                "checkpoint version mismatch in {} (expected {}, found {})",
                self.path.display(),
                CHECKPOINT_VERSION,
                checkpoint.version
            )));
        }
        Ok(Some(checkpoint))
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), AuditError> {
        let mut payload = serde_json::to_vec_pretty(checkpoint)
            .map_err(|err| AuditError::Checkpoint(format!("failed encoding checkpoint: {err}")))?;
        payload.push(b'\n');
        write_atomically(&self.path, &payload).map_err(|err| {
            AuditError::Checkpoint(format!("failed writing {}: {err}", self.path.display()))
        })?;
        debug!(
            "[crossref:checkpoint] saved {} bytes to {}",
            payload.len(),
            self.path.display()
        );
        Ok(())
    }

    fn location(&self) -> PathBuf {
        self.path.clone()
    }
}

/// In-memory checkpoint store for tests and embedded runs.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    slot: RwLock<Option<Checkpoint>>,
    saves: RwLock<u64>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        self.saves.read().map(|guard| *guard).unwrap_or(0)
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, AuditError> {
        self.slot
            .read()
            .map_err(|_| AuditError::Checkpoint("checkpoint lock poisoned".into()))
            .map(|guard| guard.clone())
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), AuditError> {
        *self
            .slot
            .write()
            .map_err(|_| AuditError::Checkpoint("checkpoint lock poisoned".into()))? =
            Some(checkpoint.clone());
        *self
            .saves
            .write()
            .map_err(|_| AuditError::Checkpoint("checkpoint lock poisoned".into()))? += 1;
        Ok(())
    }

    fn location(&self) -> PathBuf {
        PathBuf::from("<memory>")
    }
}

/// Write `bytes` to a temp file beside `path`, fsync, then rename over `path`.
///
/// Readers observe either the previous file or the complete new one.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
