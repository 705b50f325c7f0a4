use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::checkpoint::ScanScope;
use crate::constants::checkpoint::{DEFAULT_CHECKPOINT_DIR, DEFAULT_CHECKPOINT_FILENAME};
use crate::constants::collections::{
    FIELD_BODIES, FIELD_BODY, FIELD_ITEM, FIELD_REPOSITORY, FIELD_TIMESTAMP, ITEMS, PRIMARY,
    REPOSITORIES,
};
use crate::constants::report::{DEFAULT_REPORT_DIR, DEFAULT_REPORT_FILENAME};
use crate::constants::scan::{
    DEFAULT_BATCH_KEY_THRESHOLD, DEFAULT_CHECKPOINT_EVERY_BATCHES, DEFAULT_PAGE_SIZE,
    DEFAULT_SAMPLE_CAP, MAX_BATCH_ROWS_FACTOR,
};
use crate::errors::AuditError;
use crate::retry::RetryConfig;
use crate::types::{CollectionName, FieldName};

/// Collection and field names the audit reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionNames {
    /// Primary collection scanned in key order.
    pub primary: CollectionName,
    /// Auxiliary collection loaded into the reference index.
    pub repositories: CollectionName,
    /// Tertiary collection resolved once per batch.
    pub items: CollectionName,
    /// Primary field referencing a repository.
    pub repository_field: FieldName,
    /// Primary field referencing an item.
    pub item_field: FieldName,
    /// Primary timestamp field used by date bounds.
    pub timestamp_field: FieldName,
    /// Repository field holding the owning body.
    pub body_field: FieldName,
    /// Item field holding the linked bodies.
    pub bodies_field: FieldName,
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            primary: PRIMARY.to_string(),
            repositories: REPOSITORIES.to_string(),
            items: ITEMS.to_string(),
            repository_field: FIELD_REPOSITORY.to_string(),
            item_field: FIELD_ITEM.to_string(),
            timestamp_field: FIELD_TIMESTAMP.to_string(),
            body_field: FIELD_BODY.to_string(),
            bodies_field: FIELD_BODIES.to_string(),
        }
    }
}

/// Optional timestamp window: `start` inclusive, `end` exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub start: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Build a range from calendar dates (midnight UTC).
    pub fn from_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            start: start.map(midnight_utc),
            end: end.map(midnight_utc),
        }
    }

    /// True when neither bound is set.
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Whether a row timestamp passes the window.
    ///
    /// A row without a timestamp only passes an unbounded window.
    pub fn contains(&self, timestamp: Option<DateTime<Utc>>) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(ts) = timestamp else {
            return false;
        };
        if let Some(start) = self.start
            && ts < start
        {
            return false;
        }
        if let Some(end) = self.end
            && ts >= end
        {
            return false;
        }
        true
    }

    /// Reject windows that can never match.
    pub fn validate(&self) -> Result<(), AuditError> {
        if let (Some(start), Some(end)) = (self.start, self.end)
            && end <= start
        {
            return Err(AuditError::Configuration(format!(
                "end date {} must be after start date {}",
                end.date_naive(),
                start.date_naive()
            )));
        }
        Ok(())
    }
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::default()).and_utc()
}

/// Top-level audit run configuration.
#[derive(Clone, Debug)]
pub struct AuditConfig {
    /// Collection and field names.
    pub collections: CollectionNames,
    /// Distinct item keys per batch; reaching it flushes the batch.
    pub batch_key_threshold: usize,
    /// Rows per batch regardless of key count.
    ///
    /// Keeps batches bounded when many rows share an item or carry none.
    pub max_batch_rows: usize,
    /// Rows requested per primary fetch.
    pub page_size: usize,
    /// Completed batches between checkpoint writes.
    pub checkpoint_every_batches: usize,
    /// Evidence records kept for the report.
    pub sample_cap: usize,
    /// Optional timestamp bounds for the primary scan.
    pub time_range: TimeRange,
    /// Stop after this many batches in the current run.
    pub max_batches: Option<usize>,
    /// Retry policy for page fetches and batch lookups.
    pub retry: RetryConfig,
    /// Checkpoint file location.
    pub checkpoint_path: PathBuf,
    /// Report file location.
    pub report_path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            collections: CollectionNames::default(),
            batch_key_threshold: DEFAULT_BATCH_KEY_THRESHOLD,
            max_batch_rows: DEFAULT_BATCH_KEY_THRESHOLD * MAX_BATCH_ROWS_FACTOR,
            page_size: DEFAULT_PAGE_SIZE,
            checkpoint_every_batches: DEFAULT_CHECKPOINT_EVERY_BATCHES,
            sample_cap: DEFAULT_SAMPLE_CAP,
            time_range: TimeRange::default(),
            max_batches: None,
            retry: RetryConfig::default(),
            checkpoint_path: default_checkpoint_path(),
            report_path: default_report_path(),
        }
    }
}

impl AuditConfig {
    /// Set the key threshold and derive the matching row cap.
    pub fn with_batch_key_threshold(mut self, threshold: usize) -> Self {
        self.batch_key_threshold = threshold;
        self.max_batch_rows = threshold.saturating_mul(MAX_BATCH_ROWS_FACTOR);
        self
    }

    /// Validate numeric limits and the time window.
    pub fn validate(&self) -> Result<(), AuditError> {
        if self.batch_key_threshold == 0 {
            return Err(AuditError::Configuration(
                "batch key threshold must be > 0".into(),
            ));
        }
        if self.max_batch_rows < self.batch_key_threshold {
            return Err(AuditError::Configuration(format!(
                "max batch rows ({}) must be >= batch key threshold ({})",
                self.max_batch_rows, self.batch_key_threshold
            )));
        }
        if self.page_size == 0 {
            return Err(AuditError::Configuration("page size must be > 0".into()));
        }
        if self.checkpoint_every_batches == 0 {
            return Err(AuditError::Configuration(
                "checkpoint interval must be > 0 batches".into(),
            ));
        }
        if self.max_batches == Some(0) {
            return Err(AuditError::Configuration(
                "max batches must be > 0 when set".into(),
            ));
        }
        self.time_range.validate()
    }

    /// Scan identity persisted with every checkpoint.
    pub fn scan_scope(&self) -> ScanScope {
        ScanScope {
            collection: self.collections.primary.clone(),
            time_field: self.collections.timestamp_field.clone(),
            start_date: self.time_range.start,
            end_date: self.time_range.end,
        }
    }
}

/// Default checkpoint location relative to the working directory.
pub fn default_checkpoint_path() -> PathBuf {
    PathBuf::from(DEFAULT_CHECKPOINT_DIR).join(DEFAULT_CHECKPOINT_FILENAME)
}

/// Default report location relative to the working directory.
pub fn default_report_path() -> PathBuf {
    PathBuf::from(DEFAULT_REPORT_DIR).join(DEFAULT_REPORT_FILENAME)
}
