use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::RunStage;
use crate::types::{CollectionName, DocumentKey};

/// Error type for store access, checkpoint persistence, and report failures.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("collection '{collection}' is unavailable: {reason}")]
    CollectionUnavailable {
        collection: CollectionName,
        reason: String,
    },
    #[error("collection '{collection}' is busy: {reason}")]
    StoreBusy {
        collection: CollectionName,
        reason: String,
    },
    #[error("collection '{collection}' returned inconsistent data: {details}")]
    CollectionInconsistent {
        collection: CollectionName,
        details: String,
    },
    #[error("reference index for '{collection}' could not be loaded: {reason}")]
    ReferenceLoad {
        collection: CollectionName,
        reason: String,
    },
    #[error("checkpoint failure: {0}")]
    Checkpoint(String),
    #[error("no checkpoint found at {}", .0.display())]
    CheckpointMissing(PathBuf),
    #[error("report failure: {0}")]
    Report(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(
        "{stage} stage failed (last committed key: {}): {source}",
        .last_key.as_deref().unwrap_or("<none>")
    )]
    Stage {
        stage: RunStage,
        last_key: Option<DocumentKey>,
        source: Box<AuditError>,
    },
}

impl AuditError {
    /// True when retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::StoreBusy { .. } => true,
            Self::Stage { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Attach the failing stage and the last committed key.
    pub fn in_stage(self, stage: RunStage, last_key: Option<DocumentKey>) -> Self {
        match self {
            already @ Self::Stage { .. } => already,
            other => Self::Stage {
                stage,
                last_key,
                source: Box::new(other),
            },
        }
    }
}
