//! Error taxonomy for the analysis pipeline

use std::time::Duration;
use thiserror::Error;

/// Errors raised while scoring checkpoints or detecting anomalies
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Metrics collaborator failed; the pipeline substitutes zeroed metrics
    #[error("system metrics unavailable for VM {vm_id}: {reason}")]
    MetricsUnavailable { vm_id: String, reason: String },

    /// Change records could not be read for the checkpoint
    #[error("no change data for checkpoint {checkpoint}: {reason}")]
    NoChangeData { checkpoint: String, reason: String },

    /// No raw extents could be located for the checkpoint
    #[error("no raw extents available for checkpoint {checkpoint}")]
    NoRawExtents { checkpoint: String },

    #[error("byte buffer is empty")]
    EmptyBuffer,

    /// A single malformed change record
    #[error("invalid change record: {0}")]
    InvalidRecord(String),

    #[error("raw extent read timed out after {0:?}")]
    Timeout(Duration),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("not enough history for VM {vm_id}: {rows} row(s), at least {required} required")]
    NotEnoughData {
        vm_id: String,
        rows: usize,
        required: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AnalysisError {
    /// Whether the pipeline recovers from this error locally
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnalysisError::MetricsUnavailable { .. }
                | AnalysisError::NoChangeData { .. }
                | AnalysisError::NoRawExtents { .. }
                | AnalysisError::EmptyBuffer
                | AnalysisError::InvalidRecord(_)
                | AnalysisError::Timeout(_)
        )
    }
}

impl From<rusqlite::Error> for AnalysisError {
    fn from(err: rusqlite::Error) -> Self {
        AnalysisError::PersistenceFailure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
