#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Running counters, distinct-entity sets, and the evidence sample.
pub mod aggregate;
/// Command-line entry point shared by the `crossref-audit` binary.
pub mod app;
/// Row batching bounded by distinct item keys.
pub mod batch;
/// Checkpoint format and persistence.
pub mod checkpoint;
/// Audit configuration types.
pub mod config;
/// Centralized constants used across scanning, checkpoints, and reports.
pub mod constants;
/// Document and decoded row types.
pub mod data;
/// Per-row consistency classification.
pub mod detector;
/// Run orchestration and lifecycle.
pub mod engine;
/// Aggregate metrics helpers.
pub mod metrics;
/// Reference index loading.
pub mod reference;
/// Markdown report rendering.
pub mod report;
/// Per-batch lookup of linking data.
pub mod resolver;
/// Retry with bounded exponential backoff.
pub mod retry;
/// Key-ordered primary scan.
pub mod scanner;
/// Document store trait and backends.
pub mod store;
/// Shared type aliases.
pub mod types;

mod errors;

pub use aggregate::{Aggregator, ReasonStats, SampleBuffer, ScanTotals};
pub use batch::{Batch, BatchAccumulator};
pub use checkpoint::{
    Checkpoint, CheckpointStatus, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
    ScanScope,
};
pub use config::{AuditConfig, CollectionNames, TimeRange};
pub use data::{Document, DocumentRow, ItemLinks, LinkRef, RepositoryAttrs};
pub use detector::{Classification, ExclusionCause, MismatchRecord, ReasonCode, classify};
pub use engine::{AuditEngine, RunOutcome, RunStage, StopHandle, finalize_only};
pub use errors::AuditError;
pub use reference::{ReferenceIndex, ReferenceIndexLoader};
pub use report::{ReportEmitter, render_report};
pub use resolver::{BatchResolution, BatchResolver};
pub use retry::RetryConfig;
pub use scanner::CursorScanner;
pub use store::{DocumentStore, InMemoryStore, ScanRequest, SqliteStore};
pub use types::{BodyId, CollectionName, DocumentKey, EntityId, FieldName, ItemId, RepositoryId};
