//! Core data models for checkpoint entropy analysis

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of numeric features a [`CompositeScore`] contributes to the
/// anomaly detector's feature matrix.
pub const FEATURE_COUNT: usize = 13;

/// One changed disk region of a checkpoint, after numeric coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockChangeRecord {
    pub start: u64,
    pub length: u64,
    pub dirty: bool,
    pub zero: bool,
}

impl BlockChangeRecord {
    pub fn new(start: u64, length: u64, dirty: bool, zero: bool) -> Self {
        Self {
            start,
            length,
            dirty,
            zero,
        }
    }
}

/// A change record as exported by the backup index, with text columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChangeRecord {
    pub start: String,
    pub length: String,
    pub dirty: String,
    pub zero: String,
}

impl RawChangeRecord {
    pub fn new(
        start: impl Into<String>,
        length: impl Into<String>,
        dirty: impl Into<String>,
        zero: impl Into<String>,
    ) -> Self {
        Self {
            start: start.into(),
            length: length.into(),
            dirty: dirty.into(),
            zero: zero.into(),
        }
    }
}

impl From<BlockChangeRecord> for RawChangeRecord {
    fn from(record: BlockChangeRecord) -> Self {
        Self {
            start: record.start.to_string(),
            length: record.length.to_string(),
            dirty: record.dirty.to_string(),
            zero: record.zero.to_string(),
        }
    }
}

/// Length-based statistics of one checkpoint's change records
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticalSummary {
    pub length_entropy: f64,
    pub mean_block_size: f64,
    pub variance: f64,
    pub std_deviation: f64,
    /// Byte-weighted share of zeroed regions
    pub zeroed_ratio: f64,
    /// Byte-weighted share of dirty regions
    pub dirty_ratio: f64,
}

/// Entropy figures of the changed bytes of one checkpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ByteEntropyResult {
    /// Bits per byte, in [0, 8]
    pub byte_entropy: f64,
    /// Chi-square against a uniform byte distribution
    pub chi_square: f64,
}

/// Hypervisor load figures for the VM at analysis time
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetricsSample {
    pub cpu_usage_percent: f64,
    pub mem_free_kb: u64,
    pub mem_used_kb: u64,
}

impl SystemMetricsSample {
    /// Sample used when the metrics collaborator is unavailable
    pub fn zeroed() -> Self {
        Self::default()
    }
}

/// Fused per-checkpoint risk row, as persisted in the history store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub vm_id: String,
    pub timestamp: DateTime<Utc>,
    pub entropy_score: f64,
    pub mean_block_size: f64,
    pub variance: f64,
    pub std_deviation: f64,
    pub zeroed_ratio: f64,
    pub dirty_ratio: f64,
    /// Shannon entropy of the length distribution
    pub shannon_entropy: f64,
    pub delta_entropy: f64,
    pub byte_entropy: f64,
    pub chi_square: f64,
    pub cpu_usage: f64,
    pub mem_free_kb: u64,
    pub mem_used_kb: u64,
}

impl CompositeScore {
    /// Numeric features fed to the anomaly detector, in column order
    pub fn features(&self) -> [f64; FEATURE_COUNT] {
        [
            self.entropy_score,
            self.mean_block_size,
            self.variance,
            self.std_deviation,
            self.zeroed_ratio,
            self.dirty_ratio,
            self.shannon_entropy,
            self.delta_entropy,
            self.byte_entropy,
            self.chi_square,
            self.cpu_usage,
            self.mem_free_kb as f64,
            self.mem_used_kb as f64,
        ]
    }
}

/// Per-sample outcome of an anomaly detection run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyLabel {
    Normal,
    Anomaly,
}

impl AnomalyLabel {
    /// Stored code: `1` for normal, `-1` for anomaly
    pub fn code(self) -> i8 {
        match self {
            AnomalyLabel::Normal => 1,
            AnomalyLabel::Anomaly => -1,
        }
    }

    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            1 => Some(AnomalyLabel::Normal),
            -1 => Some(AnomalyLabel::Anomaly),
            _ => None,
        }
    }

    pub fn is_anomaly(self) -> bool {
        self == AnomalyLabel::Anomaly
    }
}

/// Result of one anomaly detection run over a VM's score history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub vm_id: String,
    pub timestamp: DateTime<Utc>,
    /// One label per history row, in history order
    pub per_sample_labels: Vec<AnomalyLabel>,
    pub anomaly_percentage: f64,
    /// Isolation scores in (0, 1]; not persisted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scores: Vec<f64>,
    /// Score above which a sample was labelled anomalous; not persisted
    #[serde(default)]
    pub threshold: f64,
}

impl AnomalyVerdict {
    pub fn anomaly_count(&self) -> usize {
        self.per_sample_labels
            .iter()
            .filter(|label| label.is_anomaly())
            .count()
    }

    /// Labels serialized as comma-separated codes, e.g. `1, -1, 1`
    pub fn labels_to_string(&self) -> String {
        self.per_sample_labels
            .iter()
            .map(|label| label.code().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Parse the stored label sequence; unknown codes yield `None`
    pub fn labels_from_str(raw: &str) -> Option<Vec<AnomalyLabel>> {
        if raw.trim().is_empty() {
            return Some(Vec::new());
        }
        raw.split(',')
            .map(|part| {
                part.trim()
                    .parse::<i8>()
                    .ok()
                    .and_then(AnomalyLabel::from_code)
            })
            .collect()
    }
}
