/// Default collection and field names for the bundled audit.
pub mod collections {
    /// Primary collection scanned in key order.
    pub const PRIMARY: &str = "documents";
    /// Auxiliary collection preloaded into the reference index.
    pub const REPOSITORIES: &str = "repositories";
    /// Tertiary collection resolved per batch.
    pub const ITEMS: &str = "items";
    /// Primary field holding the repository reference.
    pub const FIELD_REPOSITORY: &str = "repository";
    /// Primary field holding the item reference (the batch foreign key).
    pub const FIELD_ITEM: &str = "item";
    /// Primary field holding the RFC 3339 timestamp used by date bounds.
    pub const FIELD_TIMESTAMP: &str = "createdAt";
    /// Repository field holding the owning body id.
    pub const FIELD_BODY: &str = "body";
    /// Item field holding the list of linked body ids.
    pub const FIELD_BODIES: &str = "bodies";
}

/// Constants used by scanning, batching, and sampling defaults.
pub mod scan {
    /// Distinct item keys that trigger a batch flush.
    pub const DEFAULT_BATCH_KEY_THRESHOLD: usize = 1000;
    /// Multiplier applied to the key threshold to cap rows per batch.
    pub const MAX_BATCH_ROWS_FACTOR: usize = 4;
    /// Rows requested per primary-collection fetch.
    pub const DEFAULT_PAGE_SIZE: usize = 1000;
    /// Completed batches between checkpoint writes.
    pub const DEFAULT_CHECKPOINT_EVERY_BATCHES: usize = 10;
    /// Evidence records retained for the report.
    pub const DEFAULT_SAMPLE_CAP: usize = 50;
    /// Minimum seconds between progress log lines.
    pub const PROGRESS_REPORT_SECS: u64 = 5;
}

/// Constants used by I/O retry.
pub mod retry {
    /// Attempts per I/O call, including the first.
    pub const DEFAULT_MAX_ATTEMPTS: usize = 4;
    /// Base backoff delay in milliseconds.
    pub const DEFAULT_BASE_DELAY_MS: u64 = 200;
    /// Backoff ceiling in milliseconds.
    pub const DEFAULT_MAX_DELAY_MS: u64 = 5_000;
}

/// Constants used by checkpoint persistence.
pub mod checkpoint {
    /// Version tag written into checkpoint files.
    pub const CHECKPOINT_VERSION: u32 = 1;
    /// Default directory for checkpoint files.
    pub const DEFAULT_CHECKPOINT_DIR: &str = ".crossref_audit";
    /// Default checkpoint filename.
    pub const DEFAULT_CHECKPOINT_FILENAME: &str = "checkpoint.json";
}

/// Constants used by report rendering.
pub mod report {
    /// Default directory for rendered reports.
    pub const DEFAULT_REPORT_DIR: &str = "reports";
    /// Default report filename.
    pub const DEFAULT_REPORT_FILENAME: &str = "crossref_audit.md";
    /// Report title line.
    pub const REPORT_TITLE: &str = "Cross-reference audit: linked-entity consistency";
}

/// Constants used by the SQLite document store.
pub mod sqlite {
    /// Milliseconds SQLite waits on a locked database before reporting busy.
    pub const BUSY_TIMEOUT_MS: u64 = 5_000;
    /// Rows inserted per transaction by the JSON Lines importer.
    pub const IMPORT_CHUNK_ROWS: usize = 5_000;
}
