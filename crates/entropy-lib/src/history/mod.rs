//! Score history persistence
//!
//! Append-only storage for composite score rows and anomaly verdicts:
//! - One score table keyed by VM id, indexed on `(vm_id, timestamp)`
//! - One anomaly-results table with serialized label sequences
//! - Idempotent schema bootstrap

mod schema;
mod sqlite;

pub use sqlite::SqliteHistoryStore;

use crate::error::Result;
use crate::models::{AnomalyVerdict, CompositeScore};

/// Append-only store of per-VM score history.
///
/// Implementations never update or delete rows; each append is a single
/// atomic write.
pub trait HistoryStore: Send + Sync {
    /// Append a score row, returning its row id
    fn append(&self, score: &CompositeScore) -> Result<i64>;

    /// All score rows of a VM, oldest first
    fn list_by_vm(&self, vm_id: &str) -> Result<Vec<CompositeScore>>;

    /// Append an anomaly verdict, returning its row id
    fn append_verdict(&self, verdict: &AnomalyVerdict) -> Result<i64>;

    /// All stored verdicts of a VM, oldest first
    fn list_verdicts(&self, vm_id: &str) -> Result<Vec<AnomalyVerdict>>;
}
