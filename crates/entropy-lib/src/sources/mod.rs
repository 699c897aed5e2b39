//! Collaborator interfaces for checkpoint inputs
//!
//! The pipeline pulls its inputs through these traits:
//! - System metrics from the hypervisor management API
//! - Change records from the backup index
//! - Raw changed bytes from staged backup extents
//!
//! Only the file-backed extent source is implemented here; metrics and
//! index lookups are provided by the embedding service.

mod files;

pub use files::{ExtentLocator, FileExtentSource};

use crate::error::Result;
use crate::models::{RawChangeRecord, SystemMetricsSample};
use std::pin::Pin;
use tokio::io::AsyncRead;

pub use async_trait::async_trait;

/// Readable raw extent, consumed in chunks
pub type ExtentReader = Pin<Box<dyn AsyncRead + Send>>;

/// Source of hypervisor load metrics for a VM
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Fetch current CPU and memory figures.
    ///
    /// Authentication or network failures should surface as
    /// `MetricsUnavailable`; the pipeline falls back to a zeroed sample.
    async fn fetch_system_metrics(&self, vm_id: &str) -> Result<SystemMetricsSample>;
}

/// Source of a checkpoint's change records
#[async_trait]
pub trait ChangeRecordSource: Send + Sync {
    /// Fetch the change records of one checkpoint, in disk order.
    /// An empty list is valid.
    async fn fetch_change_records(
        &self,
        vm_id: &str,
        checkpoint: &str,
    ) -> Result<Vec<RawChangeRecord>>;
}

/// Source of the raw bytes referenced by a checkpoint's change records
#[async_trait]
pub trait ExtentSource: Send + Sync {
    /// Open the checkpoint's extents in record order.
    ///
    /// Returns `NoRawExtents` when nothing can be located.
    async fn open_extents(&self, vm_id: &str, checkpoint: &str) -> Result<Vec<ExtentReader>>;
}
