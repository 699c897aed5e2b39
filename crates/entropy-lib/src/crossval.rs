//! Cross-validation against an external reference implementation
//!
//! The reference runs as a side channel after a score is persisted. Its
//! figures are compared with ours for operator confidence and never
//! influence scoring or persistence.

use crate::error::{AnalysisError, Result};
use crate::models::{BlockChangeRecord, CompositeScore, StatisticalSummary};
use crate::scoring::round_to;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use tempfile::{Builder, NamedTempFile};
use tokio::process::Command;
use tracing::debug;

pub const METRIC_LENGTH_ENTROPY: &str = "Shannon Entropy (Length)";
pub const METRIC_MEAN_BLOCK_SIZE: &str = "Mean Block Size";
pub const METRIC_VARIANCE: &str = "Variance";
pub const METRIC_STD_DEVIATION: &str = "Standard Deviation";
pub const METRIC_ZEROED_RATIO: &str = "Zeroed Block Ratio";
pub const METRIC_DIRTY_RATIO: &str = "Dirty Block Ratio";
pub const METRIC_ENTROPY_SCORE: &str = "Weighted Entropy Score";

/// Named figures reported by the reference implementation
pub type ReferenceMetrics = HashMap<String, f64>;

/// External reference implementation
#[async_trait]
pub trait CrossValidator: Send + Sync {
    async fn reference_metrics(
        &self,
        vm_id: &str,
        records: &[BlockChangeRecord],
    ) -> Result<ReferenceMetrics>;
}

/// Parse `key: value` lines; lines whose value is not a float are ignored
pub fn parse_reference_output(output: &str) -> ReferenceMetrics {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let value = value.trim().parse::<f64>().ok()?;
            Some((key.trim().to_string(), value))
        })
        .collect()
}

/// Runs a reference script with a CSV export of the records as its only
/// argument and parses its stdout.
pub struct ScriptCrossValidator {
    program: PathBuf,
    args: Vec<String>,
    scratch_dir: PathBuf,
}

impl ScriptCrossValidator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Arguments placed before the CSV path (e.g. a script for an interpreter)
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Export `records` to a uniquely named CSV in the scratch directory.
    /// The file is removed when the returned handle drops.
    fn write_csv(&self, records: &[BlockChangeRecord]) -> Result<NamedTempFile> {
        let mut file = Builder::new()
            .prefix("data_")
            .suffix(".csv")
            .tempfile_in(&self.scratch_dir)?;
        for record in records {
            writeln!(
                file,
                "{},{},{},{}",
                record.start, record.length, record.dirty, record.zero
            )?;
        }
        file.as_file().sync_all()?;
        Ok(file)
    }
}

#[async_trait]
impl CrossValidator for ScriptCrossValidator {
    async fn reference_metrics(
        &self,
        vm_id: &str,
        records: &[BlockChangeRecord],
    ) -> Result<ReferenceMetrics> {
        let csv = self.write_csv(records)?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(csv.path())
            .output()
            .await?;
        drop(csv);

        if !output.status.success() {
            return Err(AnalysisError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!(
                    "reference script exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let metrics = parse_reference_output(&stdout);
        debug!(vm_id = %vm_id, figures = metrics.len(), "Reference metrics parsed");
        Ok(metrics)
    }
}

/// Mean of two figures: 5 decimal places below 1e5, unrounded above
pub fn reference_average(ours: f64, reference: f64) -> f64 {
    let avg = (ours + reference) / 2.0;
    if avg < 1e5 {
        round_to(avg, 5)
    } else {
        avg
    }
}

/// `|ours - reference| / ours` in percent, 5 decimal places; 0 when `ours` is 0
pub fn percent_difference(ours: f64, reference: f64) -> f64 {
    if ours == 0.0 {
        return 0.0;
    }
    round_to((ours - reference).abs() / ours * 100.0, 5)
}

/// One compared figure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub metric: String,
    pub ours: f64,
    /// 0 when the reference did not report this figure
    pub reference: f64,
    pub percent_difference: f64,
    pub average: f64,
}

/// Side-by-side comparison of our figures with the reference's
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub vm_id: String,
    pub rows: Vec<ComparisonRow>,
}

impl ComparisonReport {
    pub fn build(
        summary: &StatisticalSummary,
        score: &CompositeScore,
        reference: &ReferenceMetrics,
    ) -> Self {
        let ours = [
            (METRIC_LENGTH_ENTROPY, summary.length_entropy),
            (METRIC_MEAN_BLOCK_SIZE, summary.mean_block_size),
            (METRIC_VARIANCE, summary.variance),
            (METRIC_STD_DEVIATION, summary.std_deviation),
            (METRIC_ZEROED_RATIO, summary.zeroed_ratio),
            (METRIC_DIRTY_RATIO, summary.dirty_ratio),
            (METRIC_ENTROPY_SCORE, score.entropy_score),
        ];

        let rows = ours
            .iter()
            .map(|&(metric, value)| {
                let theirs = reference.get(metric).copied().unwrap_or(0.0);
                ComparisonRow {
                    metric: metric.to_string(),
                    ours: value,
                    reference: theirs,
                    percent_difference: percent_difference(value, theirs),
                    average: reference_average(value, theirs),
                }
            })
            .collect();

        Self {
            vm_id: score.vm_id.clone(),
            rows,
        }
    }

    /// Largest percent difference across all rows
    pub fn max_percent_difference(&self) -> f64 {
        self.rows
            .iter()
            .map(|row| row.percent_difference)
            .fold(0.0, f64::max)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
