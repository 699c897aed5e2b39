//! Entropy analysis library for VM incremental backups
//!
//! This crate provides the core functionality for:
//! - Length statistics of changed disk regions
//! - Byte-level entropy of raw changed extents
//! - Composite risk scoring and score history persistence
//! - Isolation-forest anomaly detection over score history
//! - Cross-validation against a reference implementation

pub mod anomaly;
pub mod config;
pub mod crossval;
pub mod entropy;
pub mod error;
pub mod history;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod scoring;
pub mod sources;
pub mod stats;

pub use anomaly::{AnomalyDetector, DetectorConfig};
pub use config::AnalysisConfig;
pub use error::{AnalysisError, Result};
pub use history::{HistoryStore, SqliteHistoryStore};
pub use models::*;
pub use observability::{init_tracing, PipelineMetrics, StructuredLogger};
pub use pipeline::{CheckpointPipeline, CheckpointPipelineBuilder, PipelineConfig};
pub use scoring::ScoreEngine;
