//! Contamination-thresholded anomaly detector

use super::forest::{
    percentile, ForestConfig, IsolationForest, DEFAULT_MAX_SAMPLES, DEFAULT_N_ESTIMATORS,
};
use crate::error::{AnalysisError, Result};
use crate::models::{AnomalyLabel, AnomalyVerdict, CompositeScore};
use chrono::Utc;
use tracing::debug;

/// Minimum history rows required to train the forest
pub const MIN_HISTORY_ROWS: usize = 2;

/// Default expected share of anomalous samples
pub const DEFAULT_CONTAMINATION: f64 = 0.05;

/// Configuration for the anomaly detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// Number of trees in the ensemble
    pub n_estimators: usize,
    /// Per-tree subsample size
    pub max_samples: usize,
    /// Expected share of anomalies, in (0, 0.5]
    pub contamination: f64,
    /// Forest seed; `None` draws one from the process RNG on every run
    pub seed: Option<u64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            n_estimators: DEFAULT_N_ESTIMATORS,
            max_samples: DEFAULT_MAX_SAMPLES,
            contamination: DEFAULT_CONTAMINATION,
            seed: None,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(AnalysisError::Config(format!(
                "contamination must be in (0, 0.5], got {}",
                self.contamination
            )));
        }
        if self.n_estimators == 0 {
            return Err(AnalysisError::Config("n_estimators must be at least 1".into()));
        }
        if self.max_samples == 0 {
            return Err(AnalysisError::Config("max_samples must be at least 1".into()));
        }
        Ok(())
    }
}

/// Unsupervised outlier detector over a VM's score history
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: DetectorConfig,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Detector with a fixed seed, for reproducible runs
    pub fn seeded(seed: u64) -> Self {
        Self {
            config: DetectorConfig {
                seed: Some(seed),
                ..DetectorConfig::default()
            },
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Label every row of `history` (oldest first) as normal or anomalous.
    ///
    /// Fails with `NotEnoughData` for fewer than [`MIN_HISTORY_ROWS`] rows.
    pub fn detect(&self, vm_id: &str, history: &[CompositeScore]) -> Result<AnomalyVerdict> {
        if history.len() < MIN_HISTORY_ROWS {
            return Err(AnalysisError::NotEnoughData {
                vm_id: vm_id.to_string(),
                rows: history.len(),
                required: MIN_HISTORY_ROWS,
            });
        }

        let matrix: Vec<Vec<f64>> = history.iter().map(|row| row.features().to_vec()).collect();
        let seed = self.config.seed.unwrap_or_else(rand::random);

        let forest = IsolationForest::fit(
            &matrix,
            &ForestConfig {
                n_estimators: self.config.n_estimators,
                max_samples: self.config.max_samples,
                seed,
            },
        );
        let scores = forest.score_all(&matrix);

        let threshold = percentile(&scores, 100.0 * (1.0 - self.config.contamination));
        let labels: Vec<AnomalyLabel> = scores
            .iter()
            .map(|&s| {
                if s > threshold {
                    AnomalyLabel::Anomaly
                } else {
                    AnomalyLabel::Normal
                }
            })
            .collect();

        let anomalies = labels.iter().filter(|l| l.is_anomaly()).count();
        let anomaly_percentage = anomalies as f64 / labels.len() as f64;

        debug!(
            vm_id = %vm_id,
            rows = history.len(),
            trees = forest.n_trees(),
            seed = seed,
            threshold = threshold,
            anomalies = anomalies,
            "Isolation forest evaluated"
        );

        Ok(AnomalyVerdict {
            vm_id: vm_id.to_string(),
            timestamp: Utc::now(),
            per_sample_labels: labels,
            anomaly_percentage,
            scores,
            threshold,
        })
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self {
            config: DetectorConfig::default(),
        }
    }
}
