//! Analysis configuration

use crate::anomaly::{
    DetectorConfig, DEFAULT_CONTAMINATION, DEFAULT_MAX_SAMPLES, DEFAULT_N_ESTIMATORS,
};
use crate::entropy::DEFAULT_CHUNK_BYTES;
use crate::error::AnalysisError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix, e.g. `ENTROPY_DATABASE_PATH`
pub const ENV_PREFIX: &str = "ENTROPY";

/// Analysis configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Name reported in structured log events
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// SQLite database holding score history and verdicts
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Chunk size for streaming raw extents
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,

    /// Upper bound on reading all raw extents of one checkpoint
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Trees in the isolation forest
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,

    /// Per-tree subsample size
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    /// Expected share of anomalous checkpoints
    #[serde(default = "default_contamination")]
    pub contamination: f64,

    /// Fixed forest seed; unset draws a fresh seed per run
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_database_path() -> PathBuf {
    PathBuf::from("entropy_scores.db")
}

fn default_read_chunk_bytes() -> usize {
    DEFAULT_CHUNK_BYTES
}

fn default_read_timeout() -> u64 {
    300
}

fn default_n_estimators() -> usize {
    DEFAULT_N_ESTIMATORS
}

fn default_max_samples() -> usize {
    DEFAULT_MAX_SAMPLES
}

fn default_contamination() -> f64 {
    DEFAULT_CONTAMINATION
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            database_path: default_database_path(),
            read_chunk_bytes: default_read_chunk_bytes(),
            read_timeout_secs: default_read_timeout(),
            n_estimators: default_n_estimators(),
            max_samples: default_max_samples(),
            contamination: default_contamination(),
            seed: None,
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::load_with_file(None)
    }

    /// Load configuration from an optional TOML file overlaid by the
    /// environment
    pub fn load_with_file(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to build analysis configuration")?;

        let parsed: AnalysisConfig = config
            .try_deserialize()
            .context("Failed to parse analysis configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> std::result::Result<(), AnalysisError> {
        if self.read_chunk_bytes == 0 {
            return Err(AnalysisError::Config(
                "read_chunk_bytes must be at least 1".into(),
            ));
        }
        if self.read_timeout_secs == 0 {
            return Err(AnalysisError::Config(
                "read_timeout_secs must be at least 1".into(),
            ));
        }
        self.detector_config().validate()
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            n_estimators: self.n_estimators,
            max_samples: self.max_samples,
            contamination: self.contamination,
            seed: self.seed,
        }
    }
}
