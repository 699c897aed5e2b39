//! Observability infrastructure for the analysis pipeline
//!
//! Provides:
//! - Prometheus metrics (scoring latency, byte-analysis latency, persisted
//!   rows, anomaly runs, degraded inputs)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Histogram buckets for latency measurements (in seconds).
/// Byte analysis of large extents can take minutes.
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the JSON tracing subscriber with an env filter (default `info`).
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(fmt::layer().json())
            .try_init();
    });
}

struct PipelineMetricsInner {
    scoring_latency_seconds: Histogram,
    byte_analysis_latency_seconds: Histogram,
    scores_persisted: IntCounter,
    anomaly_runs: IntCounter,
    anomalous_samples: IntCounter,
    invalid_records: IntCounter,
    degraded_runs: IntCounterVec,
    persistence_failures: IntCounter,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            scoring_latency_seconds: register_histogram!(
                "entropy_scoring_latency_seconds",
                "Time spent analyzing and scoring one checkpoint",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register scoring_latency_seconds"),

            byte_analysis_latency_seconds: register_histogram!(
                "entropy_byte_analysis_latency_seconds",
                "Time spent reading and histogramming raw extents",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register byte_analysis_latency_seconds"),

            scores_persisted: register_int_counter!(
                "entropy_scores_persisted_total",
                "Composite score rows appended to the history store"
            )
            .expect("Failed to register scores_persisted"),

            anomaly_runs: register_int_counter!(
                "entropy_anomaly_runs_total",
                "Anomaly detection runs that produced a verdict"
            )
            .expect("Failed to register anomaly_runs"),

            anomalous_samples: register_int_counter!(
                "entropy_anomalous_samples_total",
                "History rows labelled anomalous across all runs"
            )
            .expect("Failed to register anomalous_samples"),

            invalid_records: register_int_counter!(
                "entropy_invalid_change_records_total",
                "Change records dropped during numeric coercion"
            )
            .expect("Failed to register invalid_records"),

            degraded_runs: register_int_counter_vec!(
                "entropy_degraded_runs_total",
                "Scoring runs that recovered from a missing input",
                &["input"]
            )
            .expect("Failed to register degraded_runs"),

            persistence_failures: register_int_counter!(
                "entropy_persistence_failures_total",
                "Failed writes to the history store"
            )
            .expect("Failed to register persistence_failures"),
        }
    }
}

/// Degraded input labels
pub mod inputs {
    pub const SYSTEM_METRICS: &str = "system_metrics";
    pub const CHANGE_RECORDS: &str = "change_records";
    pub const RAW_EXTENTS: &str = "raw_extents";
}

/// Pipeline metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new)
    }

    pub fn observe_scoring_latency(&self, duration_secs: f64) {
        self.inner().scoring_latency_seconds.observe(duration_secs);
    }

    pub fn observe_byte_analysis_latency(&self, duration_secs: f64) {
        self.inner().byte_analysis_latency_seconds.observe(duration_secs);
    }

    pub fn inc_scores_persisted(&self) {
        self.inner().scores_persisted.inc();
    }

    /// Record a verdict and how many samples it flagged
    pub fn record_anomaly_run(&self, anomalous: usize) {
        self.inner().anomaly_runs.inc();
        self.inner().anomalous_samples.inc_by(anomalous as u64);
    }

    pub fn add_invalid_records(&self, count: usize) {
        self.inner().invalid_records.inc_by(count as u64);
    }

    /// Count a run that fell back for `input` (see [`inputs`])
    pub fn inc_degraded(&self, input: &str) {
        self.inner().degraded_runs.with_label_values(&[input]).inc();
    }

    pub fn inc_persistence_failures(&self) {
        self.inner().persistence_failures.inc();
    }

    pub fn scores_persisted(&self) -> u64 {
        self.inner().scores_persisted.get()
    }

    pub fn degraded(&self, input: &str) -> u64 {
        self.inner().degraded_runs.with_label_values(&[input]).get()
    }
}

/// Structured logger for pipeline events
///
/// Provides consistent JSON-formatted events for scores, verdicts and
/// degraded inputs.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_checkpoint_scored(
        &self,
        vm_id: &str,
        checkpoint: &str,
        entropy_score: f64,
        byte_entropy: f64,
        delta_entropy: f64,
        row_id: i64,
    ) {
        info!(
            event = "checkpoint_scored",
            node = %self.node_name,
            vm_id = %vm_id,
            checkpoint = %checkpoint,
            entropy_score = entropy_score,
            byte_entropy = byte_entropy,
            delta_entropy = delta_entropy,
            row_id = row_id,
            "Checkpoint scored and persisted"
        );
    }

    /// Log a recovered input failure
    pub fn log_degraded_input(&self, vm_id: &str, checkpoint: &str, input: &str, reason: &str) {
        warn!(
            event = "input_degraded",
            node = %self.node_name,
            vm_id = %vm_id,
            checkpoint = %checkpoint,
            input = %input,
            reason = %reason,
            "Input unavailable, continuing with defaults"
        );
    }

    pub fn log_verdict(&self, vm_id: &str, samples: usize, anomalies: usize, percentage: f64) {
        if anomalies > 0 {
            warn!(
                event = "anomaly_verdict",
                node = %self.node_name,
                vm_id = %vm_id,
                samples = samples,
                anomalies = anomalies,
                anomaly_percentage = percentage,
                "Anomalous checkpoints in score history"
            );
        } else {
            info!(
                event = "anomaly_verdict",
                node = %self.node_name,
                vm_id = %vm_id,
                samples = samples,
                anomalies = 0,
                anomaly_percentage = percentage,
                "No anomalous checkpoints in score history"
            );
        }
    }

    pub fn log_cross_validation(&self, vm_id: &str, max_percent_difference: f64, report: &str) {
        info!(
            event = "cross_validation",
            node = %self.node_name,
            vm_id = %vm_id,
            max_percent_difference = max_percent_difference,
            report = %report,
            "Compared figures with reference implementation"
        );
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_metrics_handles_share_state() {
        let metrics = PipelineMetrics::new();
        let clone = metrics.clone();

        let before = metrics.scores_persisted();
        clone.inc_scores_persisted();
        assert!(metrics.scores_persisted() > before);

        metrics.observe_scoring_latency(0.01);
        metrics.observe_byte_analysis_latency(1.5);
        metrics.record_anomaly_run(2);
        metrics.add_invalid_records(3);
        metrics.inc_persistence_failures();

        let degraded_before = metrics.degraded(inputs::RAW_EXTENTS);
        metrics.inc_degraded(inputs::RAW_EXTENTS);
        assert!(metrics.degraded(inputs::RAW_EXTENTS) > degraded_before);
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("backup-node-1");
        assert_eq!(logger.node_name(), "backup-node-1");
    }
}
