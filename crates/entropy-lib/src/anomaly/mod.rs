//! Anomaly detection over a VM's score history
//!
//! This module provides:
//! - A seedable isolation forest (random partition tree ensemble)
//! - A detector that thresholds isolation scores by contamination and
//!   produces per-sample labels

mod detector;
mod forest;


pub use detector::{AnomalyDetector, DetectorConfig, DEFAULT_CONTAMINATION, MIN_HISTORY_ROWS};
pub use forest::{
    average_path_length, percentile, ForestConfig, IsolationForest, DEFAULT_MAX_SAMPLES,
    DEFAULT_N_ESTIMATORS,
};
