//! Run orchestration: reference loading, batched scanning, checkpointing, reporting.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::aggregate::{Aggregator, ScanTotals};
use crate::batch::{Batch, BatchAccumulator};
use crate::checkpoint::{Checkpoint, CheckpointStatus, CheckpointStore};
use crate::config::AuditConfig;
use crate::constants::scan::PROGRESS_REPORT_SECS;
use crate::detector::classify;
use crate::errors::AuditError;
use crate::reference::{ReferenceIndex, ReferenceIndexLoader};
use crate::report::ReportEmitter;
use crate::resolver::BatchResolver;
use crate::scanner::CursorScanner;
use crate::store::DocumentStore;
use crate::types::DocumentKey;

/// Engine lifecycle stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStage {
    /// Configuration and checkpoint loading.
    Init,
    LoadingReferences,
    Scanning,
    Checkpointing,
    Reporting,
    /// Report from the last checkpoint, no scan.
    FinalizeOnly,
    Done,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::LoadingReferences => "reference loading",
            Self::Scanning => "scanning",
            Self::Checkpointing => "checkpoint",
            Self::Reporting => "report",
            Self::FinalizeOnly => "finalize-only",
            Self::Done => "done",
        })
    }
}

/// Cooperative stop signal, observed between batches.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Create an untriggered handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop after the batch in flight.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Summary of one engine invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    /// The scan stopped before input was exhausted.
    pub stopped_early: bool,
    /// Batches aggregated by this invocation.
    pub batches_this_run: usize,
    /// Rows aggregated by this invocation.
    pub rows_scanned_this_run: u64,
    /// Cursor persisted in the final checkpoint.
    pub last_key: Option<DocumentKey>,
    /// Status persisted in the final checkpoint.
    pub status: CheckpointStatus,
    /// Cumulative totals across all runs.
    pub totals: ScanTotals,
    /// Report written by this invocation.
    pub report_path: PathBuf,
}

/// Drives one audit run against a document store and a checkpoint store.
pub struct AuditEngine<'a> {
    store: &'a dyn DocumentStore,
    checkpoints: &'a dyn CheckpointStore,
    config: AuditConfig,
    stop: StopHandle,
    stage: RunStage,
}

impl<'a> AuditEngine<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        checkpoints: &'a dyn CheckpointStore,
        config: AuditConfig,
    ) -> Self {
        Self {
            store,
            checkpoints,
            config,
            stop: StopHandle::new(),
            stage: RunStage::Init,
        }
    }

    /// Use an externally owned stop handle.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Current lifecycle stage.
    pub fn stage(&self) -> RunStage {
        self.stage
    }

    fn enter(&mut self, stage: RunStage) {
        debug!("[crossref:engine] {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    /// Scan from the last checkpoint (or the beginning), then checkpoint and report.
    ///
    /// Errors leave the last saved checkpoint untouched; it remains the rollback
    /// point for the next run.
    pub fn run(&mut self) -> Result<RunOutcome, AuditError> {
        self.enter(RunStage::Init);
        self.config.validate()?;
        let scope = self.config.scan_scope();
        let sample_cap = self.config.sample_cap;
        let mut aggregator = match self
            .checkpoints
            .load()
            .map_err(|err| err.in_stage(RunStage::Init, None))?
        {
            Some(checkpoint) => {
                checkpoint
                    .ensure_scope(&scope)
                    .map_err(|err| err.in_stage(RunStage::Init, checkpoint.last_key.clone()))?;
                if checkpoint.status == CheckpointStatus::Complete {
                    info!(
                        "[crossref:engine] checkpoint is complete; scanning only rows after {:?}",
                        checkpoint.last_key
                    );
                } else {
                    info!(
                        "[crossref:engine] resuming after {:?} ({} batches, {} rows already aggregated)",
                        checkpoint.last_key, checkpoint.batches_completed, checkpoint.totals.scanned
                    );
                }
                Aggregator::from_checkpoint(checkpoint, sample_cap)
            }
            None => {
                info!("[crossref:engine] no checkpoint found; starting at the beginning");
                Aggregator::new(sample_cap)
            }
        };
        let mut committed_key = aggregator.last_key().cloned();

        self.enter(RunStage::LoadingReferences);
        let references = ReferenceIndexLoader::new(self.store, &self.config.collections)
            .with_retry(self.config.retry)
            .load()
            .map_err(|err| err.in_stage(RunStage::LoadingReferences, committed_key.clone()))?;

        self.enter(RunStage::Scanning);
        let names = self.config.collections.clone();
        let store = self.store;
        let resolver = BatchResolver::new(store, &names, self.config.retry);
        let scanner = CursorScanner::new(
            store,
            &names,
            aggregator.last_key().cloned(),
            self.config.time_range,
            self.config.page_size,
            self.config.retry,
        );
        let mut accumulator =
            BatchAccumulator::new(self.config.batch_key_threshold, self.config.max_batch_rows);
        let mut progress = Progress::new(Duration::from_secs(PROGRESS_REPORT_SECS));
        let mut batches_this_run = 0usize;
        let mut rows_this_run = 0u64;
        let mut since_checkpoint = 0usize;
        let mut stopped_early = false;

        for row in scanner {
            let row = row.map_err(|err| err.in_stage(RunStage::Scanning, committed_key.clone()))?;
            let Some(batch) = accumulator.push(row) else {
                continue;
            };
            rows_this_run += absorb_batch(&resolver, &references, &mut aggregator, batch)
                .map_err(|err| err.in_stage(RunStage::Scanning, committed_key.clone()))?;
            batches_this_run += 1;
            since_checkpoint += 1;
            progress.maybe_log(&aggregator, batches_this_run);

            if since_checkpoint >= self.config.checkpoint_every_batches {
                self.save_checkpoint(&aggregator, CheckpointStatus::InProgress, committed_key.as_ref())?;
                committed_key = aggregator.last_key().cloned();
                since_checkpoint = 0;
            }
            if self.should_stop(batches_this_run) {
                stopped_early = true;
                break;
            }
        }
        if !stopped_early && let Some(batch) = accumulator.drain() {
            rows_this_run += absorb_batch(&resolver, &references, &mut aggregator, batch)
                .map_err(|err| err.in_stage(RunStage::Scanning, committed_key.clone()))?;
            batches_this_run += 1;
        }

        let status = if stopped_early {
            CheckpointStatus::InProgress
        } else {
            CheckpointStatus::Complete
        };
        let checkpoint = self.save_checkpoint(&aggregator, status, committed_key.as_ref())?;
        info!(
            "[crossref:engine] scan {} after {} batches this run ({} rows, {:.1}s); totals: scanned={} violations={} excluded={}",
            if stopped_early { "stopped" } else { "finished" },
            batches_this_run,
            rows_this_run,
            progress.elapsed_secs(),
            checkpoint.totals.scanned,
            checkpoint.totals.violations,
            checkpoint.totals.excluded
        );

        self.enter(RunStage::Reporting);
        let report_path = ReportEmitter::new(&self.config.report_path)
            .emit(&checkpoint)
            .map_err(|err| err.in_stage(RunStage::Reporting, checkpoint.last_key.clone()))?;
        self.enter(RunStage::Done);
        Ok(RunOutcome {
            stopped_early,
            batches_this_run,
            rows_scanned_this_run: rows_this_run,
            last_key: checkpoint.last_key,
            status,
            totals: checkpoint.totals,
            report_path,
        })
    }

    /// Render the report from the last checkpoint without scanning.
    pub fn finalize_only(&mut self) -> Result<RunOutcome, AuditError> {
        self.enter(RunStage::FinalizeOnly);
        let outcome = finalize_only(
            self.checkpoints,
            &ReportEmitter::new(&self.config.report_path),
        )?;
        self.enter(RunStage::Done);
        Ok(outcome)
    }

    fn should_stop(&self, batches_this_run: usize) -> bool {
        if let Some(max) = self.config.max_batches
            && batches_this_run >= max
        {
            info!("[crossref:engine] reached --max-batches {max}; stopping");
            return true;
        }
        if self.stop.is_stopped() {
            warn!("[crossref:engine] stop requested; stopping after batch {batches_this_run}");
            return true;
        }
        false
    }

    fn save_checkpoint(
        &mut self,
        aggregator: &Aggregator,
        status: CheckpointStatus,
        committed_key: Option<&DocumentKey>,
    ) -> Result<Checkpoint, AuditError> {
        self.enter(RunStage::Checkpointing);
        let checkpoint = aggregator.snapshot(self.config.scan_scope(), status);
        self.checkpoints
            .save(&checkpoint)
            .map_err(|err| err.in_stage(RunStage::Checkpointing, committed_key.cloned()))?;
        info!(
            "[crossref:checkpoint] saved lastKey={:?} batches={} violations={}",
            checkpoint.last_key, checkpoint.batches_completed, checkpoint.totals.violations
        );
        self.enter(RunStage::Scanning);
        Ok(checkpoint)
    }
}

/// Emit the report for the last saved checkpoint. Fails when none exists.
pub fn finalize_only(
    checkpoints: &dyn CheckpointStore,
    emitter: &ReportEmitter,
) -> Result<RunOutcome, AuditError> {
    let checkpoint = checkpoints
        .load()
        .map_err(|err| err.in_stage(RunStage::FinalizeOnly, None))?
        .ok_or_else(|| AuditError::CheckpointMissing(checkpoints.location()))?;
    info!(
        "[crossref:engine] finalizing from checkpoint lastKey={:?} status={:?}",
        checkpoint.last_key, checkpoint.status
    );
    let report_path = emitter
        .emit(&checkpoint)
        .map_err(|err| err.in_stage(RunStage::Reporting, checkpoint.last_key.clone()))?;
    Ok(RunOutcome {
        stopped_early: false,
        batches_this_run: 0,
        rows_scanned_this_run: 0,
        last_key: checkpoint.last_key,
        status: checkpoint.status,
        totals: checkpoint.totals,
        report_path,
    })
}

/// Resolve, classify, and aggregate one batch. Returns the rows absorbed.
fn absorb_batch(
    resolver: &BatchResolver<'_>,
    references: &ReferenceIndex,
    aggregator: &mut Aggregator,
    batch: Batch,
) -> Result<u64, AuditError> {
    let resolution = resolver.resolve(&batch)?;
    for row in batch.rows() {
        aggregator.observe(classify(row, references, &resolution));
    }
    aggregator.complete_batch(batch.last_key());
    Ok(batch.len() as u64)
}

struct Progress {
    started: Instant,
    last_report: Instant,
    every: Duration,
}

impl Progress {
    fn new(every: Duration) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_report: now,
            every,
        }
    }

    fn maybe_log(&mut self, aggregator: &Aggregator, batches_this_run: usize) {
        if self.last_report.elapsed() < self.every {
            return;
        }
        let totals = aggregator.totals();
        info!(
            "[crossref:scan] progress batches={} scanned={} violations={} excluded={} lastKey={:?} elapsed={:.1}s",
            batches_this_run,
            totals.scanned,
            totals.violations,
            totals.excluded,
            aggregator.last_key(),
            self.elapsed_secs()
        );
        self.last_report = Instant::now();
    }

    fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}
