//! Checkpoint analysis pipeline
//!
//! Runs the per-checkpoint flow: change-record statistics and byte
//! entropy are computed independently, fused with system metrics into a
//! composite score and appended to the history store. Anomaly detection
//! runs separately over the accumulated history.

use crate::anomaly::AnomalyDetector;
use crate::config::AnalysisConfig;
use crate::crossval::{ComparisonReport, CrossValidator};
use crate::entropy::{analyze_extents, DEFAULT_CHUNK_BYTES};
use crate::error::{AnalysisError, Result};
use crate::history::{HistoryStore, SqliteHistoryStore};
use crate::models::{
    AnomalyVerdict, BlockChangeRecord, ByteEntropyResult, CompositeScore, StatisticalSummary,
    SystemMetricsSample,
};
use crate::observability::{inputs, PipelineMetrics, StructuredLogger};
use crate::scoring::ScoreEngine;
use crate::sources::{ChangeRecordSource, ExtentSource, MetricsSource};
use crate::stats::{coerce_records, summarize};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default bound on reading a checkpoint's raw extents
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for the pipeline's byte-analysis stage
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub read_chunk_bytes: usize,
    pub read_timeout: Duration,
    pub node_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            read_chunk_bytes: DEFAULT_CHUNK_BYTES,
            read_timeout: DEFAULT_READ_TIMEOUT,
            node_name: "unknown".to_string(),
        }
    }
}

impl From<&AnalysisConfig> for PipelineConfig {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            read_chunk_bytes: config.read_chunk_bytes,
            read_timeout: config.read_timeout(),
            node_name: config.node_name.clone(),
        }
    }
}

/// Scores checkpoints and detects anomalies for single VMs
pub struct CheckpointPipeline {
    metrics_source: Arc<dyn MetricsSource>,
    record_source: Arc<dyn ChangeRecordSource>,
    extent_source: Option<Arc<dyn ExtentSource>>,
    store: Arc<dyn HistoryStore>,
    cross_validator: Option<Arc<dyn CrossValidator>>,
    engine: ScoreEngine,
    detector: AnomalyDetector,
    config: PipelineConfig,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
}

impl CheckpointPipeline {
    /// Analyze one checkpoint and append its composite score.
    ///
    /// Missing metrics, change records or raw extents degrade the score
    /// but never fail the run; only a persistence failure does.
    pub async fn analyze_checkpoint(&self, vm_id: &str, checkpoint: &str) -> Result<CompositeScore> {
        let start = Instant::now();
        info!(vm_id = %vm_id, checkpoint = %checkpoint, "Analyzing checkpoint");

        let (records, dropped) = self.load_records(vm_id, checkpoint).await;
        let summary = summarize(&records);
        let bytes = self.analyze_bytes(vm_id, checkpoint).await;
        let system = self.load_system_metrics(vm_id, checkpoint).await;

        let score = self
            .engine
            .compose(vm_id, Utc::now(), &summary, bytes.as_ref(), &system);

        let row_id = match self.store.append(&score) {
            Ok(id) => id,
            Err(e) => {
                self.metrics.inc_persistence_failures();
                warn!(vm_id = %vm_id, checkpoint = %checkpoint, error = %e, "Failed to persist score");
                return Err(e);
            }
        };
        self.metrics.inc_scores_persisted();
        self.metrics
            .observe_scoring_latency(start.elapsed().as_secs_f64());
        self.logger.log_checkpoint_scored(
            vm_id,
            checkpoint,
            score.entropy_score,
            score.byte_entropy,
            score.delta_entropy,
            row_id,
        );
        debug!(dropped_records = dropped, "Checkpoint analysis complete");

        self.cross_validate(vm_id, &records, &summary, &score).await;

        Ok(score)
    }

    /// Run anomaly detection over the VM's full score history and append
    /// the verdict.
    ///
    /// Fails with `NotEnoughData` below two history rows; no verdict is
    /// stored in that case.
    pub fn detect_anomalies(&self, vm_id: &str) -> Result<AnomalyVerdict> {
        let history = self.store.list_by_vm(vm_id)?;
        info!(vm_id = %vm_id, rows = history.len(), "Running anomaly detection");

        let verdict = self.detector.detect(vm_id, &history)?;

        if let Err(e) = self.store.append_verdict(&verdict) {
            self.metrics.inc_persistence_failures();
            return Err(e);
        }

        let anomalies = verdict.anomaly_count();
        self.metrics.record_anomaly_run(anomalies);
        self.logger.log_verdict(
            vm_id,
            verdict.per_sample_labels.len(),
            anomalies,
            verdict.anomaly_percentage,
        );
        Ok(verdict)
    }

    /// Score history of a VM, oldest first
    pub fn history(&self, vm_id: &str) -> Result<Vec<CompositeScore>> {
        self.store.list_by_vm(vm_id)
    }

    async fn load_records(&self, vm_id: &str, checkpoint: &str) -> (Vec<BlockChangeRecord>, usize) {
        match self.record_source.fetch_change_records(vm_id, checkpoint).await {
            Ok(raw) => {
                let outcome = coerce_records(&raw);
                if outcome.dropped > 0 {
                    self.metrics.add_invalid_records(outcome.dropped);
                    warn!(
                        vm_id = %vm_id,
                        checkpoint = %checkpoint,
                        dropped = outcome.dropped,
                        kept = outcome.records.len(),
                        "Dropped malformed change records"
                    );
                }
                if outcome.records.is_empty() {
                    let err = AnalysisError::NoChangeData {
                        checkpoint: checkpoint.to_string(),
                        reason: format!("no usable records among {} fetched", raw.len()),
                    };
                    self.metrics.inc_degraded(inputs::CHANGE_RECORDS);
                    self.logger
                        .log_degraded_input(vm_id, checkpoint, inputs::CHANGE_RECORDS, &err.to_string());
                }
                (outcome.records, outcome.dropped)
            }
            Err(e) => {
                let err = match e {
                    err @ AnalysisError::NoChangeData { .. } => err,
                    other => AnalysisError::NoChangeData {
                        checkpoint: checkpoint.to_string(),
                        reason: other.to_string(),
                    },
                };
                self.metrics.inc_degraded(inputs::CHANGE_RECORDS);
                self.logger
                    .log_degraded_input(vm_id, checkpoint, inputs::CHANGE_RECORDS, &err.to_string());
                (Vec::new(), 0)
            }
        }
    }

    async fn load_system_metrics(&self, vm_id: &str, checkpoint: &str) -> SystemMetricsSample {
        match self.metrics_source.fetch_system_metrics(vm_id).await {
            Ok(sample) => sample,
            Err(e) => {
                let err = match e {
                    err @ AnalysisError::MetricsUnavailable { .. } => err,
                    other => AnalysisError::MetricsUnavailable {
                        vm_id: vm_id.to_string(),
                        reason: other.to_string(),
                    },
                };
                self.metrics.inc_degraded(inputs::SYSTEM_METRICS);
                self.logger
                    .log_degraded_input(vm_id, checkpoint, inputs::SYSTEM_METRICS, &err.to_string());
                SystemMetricsSample::zeroed()
            }
        }
    }

    /// Byte entropy of the checkpoint's raw extents, or `None` when they
    /// are missing, empty, unreadable or too slow to read
    async fn analyze_bytes(&self, vm_id: &str, checkpoint: &str) -> Option<ByteEntropyResult> {
        let source = match &self.extent_source {
            Some(source) => source,
            None => {
                self.record_skipped_bytes(
                    vm_id,
                    checkpoint,
                    &AnalysisError::NoRawExtents {
                        checkpoint: checkpoint.to_string(),
                    },
                );
                return None;
            }
        };

        let start = Instant::now();
        let timeout = self.config.read_timeout;
        // Locating and opening extents counts against the same bound as reading
        let open_and_read = async {
            let mut extents = source.open_extents(vm_id, checkpoint).await?;
            analyze_extents(&mut extents, self.config.read_chunk_bytes, timeout).await
        };
        let result = match tokio::time::timeout(timeout, open_and_read).await {
            Ok(result) => result,
            Err(_) => Err(AnalysisError::Timeout(timeout)),
        };
        self.metrics
            .observe_byte_analysis_latency(start.elapsed().as_secs_f64());

        match result {
            Ok(bytes) => {
                debug!(
                    vm_id = %vm_id,
                    byte_entropy = bytes.byte_entropy,
                    chi_square = bytes.chi_square,
                    "Byte entropy computed"
                );
                Some(bytes)
            }
            Err(e) => {
                self.record_skipped_bytes(vm_id, checkpoint, &e);
                None
            }
        }
    }

    fn record_skipped_bytes(&self, vm_id: &str, checkpoint: &str, err: &AnalysisError) {
        self.metrics.inc_degraded(inputs::RAW_EXTENTS);
        self.logger
            .log_degraded_input(vm_id, checkpoint, inputs::RAW_EXTENTS, &err.to_string());
    }

    async fn cross_validate(
        &self,
        vm_id: &str,
        records: &[BlockChangeRecord],
        summary: &StatisticalSummary,
        score: &CompositeScore,
    ) {
        let Some(validator) = &self.cross_validator else {
            return;
        };

        match validator.reference_metrics(vm_id, records).await {
            Ok(reference) => {
                let report = ComparisonReport::build(summary, score, &reference);
                self.logger.log_cross_validation(
                    vm_id,
                    report.max_percent_difference(),
                    &report.to_json(),
                );
            }
            Err(e) => {
                warn!(vm_id = %vm_id, error = %e, "Cross-validation unavailable");
            }
        }
    }
}

/// Builder for [`CheckpointPipeline`]
pub struct CheckpointPipelineBuilder {
    metrics_source: Option<Arc<dyn MetricsSource>>,
    record_source: Option<Arc<dyn ChangeRecordSource>>,
    extent_source: Option<Arc<dyn ExtentSource>>,
    store: Option<Arc<dyn HistoryStore>>,
    cross_validator: Option<Arc<dyn CrossValidator>>,
    detector: AnomalyDetector,
    config: PipelineConfig,
}

impl CheckpointPipelineBuilder {
    pub fn new() -> Self {
        Self {
            metrics_source: None,
            record_source: None,
            extent_source: None,
            store: None,
            cross_validator: None,
            detector: AnomalyDetector::default(),
            config: PipelineConfig::default(),
        }
    }

    /// Builder preloaded with chunking, timeout and detector settings and
    /// the SQLite history store at `database_path`
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        let detector = AnomalyDetector::new(config.detector_config())?;
        let store: Arc<dyn HistoryStore> =
            Arc::new(SqliteHistoryStore::open(&config.database_path)?);
        Ok(Self {
            detector,
            store: Some(store),
            config: PipelineConfig::from(config),
            ..Self::new()
        })
    }

    pub fn metrics_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.metrics_source = Some(source);
        self
    }

    pub fn record_source(mut self, source: Arc<dyn ChangeRecordSource>) -> Self {
        self.record_source = Some(source);
        self
    }

    /// Raw extent source; without one, byte analysis is always skipped
    pub fn extent_source(mut self, source: Arc<dyn ExtentSource>) -> Self {
        self.extent_source = Some(source);
        self
    }

    pub fn store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cross_validator(mut self, validator: Arc<dyn CrossValidator>) -> Self {
        self.cross_validator = Some(validator);
        self
    }

    pub fn detector(mut self, detector: AnomalyDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn read_chunk_bytes(mut self, bytes: usize) -> Self {
        self.config.read_chunk_bytes = bytes.max(1);
        self
    }

    pub fn node_name(mut self, name: impl Into<String>) -> Self {
        self.config.node_name = name.into();
        self
    }

    pub fn build(self) -> anyhow::Result<CheckpointPipeline> {
        let metrics_source = self
            .metrics_source
            .ok_or_else(|| anyhow::anyhow!("Metrics source is required"))?;
        let record_source = self
            .record_source
            .ok_or_else(|| anyhow::anyhow!("Change record source is required"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("History store is required"))?;

        Ok(CheckpointPipeline {
            metrics_source,
            record_source,
            extent_source: self.extent_source,
            store,
            cross_validator: self.cross_validator,
            engine: ScoreEngine::new(),
            detector: self.detector,
            logger: StructuredLogger::new(self.config.node_name.clone()),
            config: self.config,
            metrics: PipelineMetrics::new(),
        })
    }
}

impl Default for CheckpointPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
