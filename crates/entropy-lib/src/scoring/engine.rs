//! Composite score computation

use super::weights::{
    Normalization, ScoreWeights, DEFAULT_NORMALIZATION, MEM_FREE_SCALE_KB, MEM_USED_SCALE_KB,
    SCORE_WEIGHTS,
};
use crate::models::{ByteEntropyResult, CompositeScore, StatisticalSummary, SystemMetricsSample};
use chrono::{DateTime, Utc};

/// Decimal places kept in the entropy score
pub const SCORE_DECIMALS: i32 = 5;

/// Round half away from zero to `decimals` places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// `|byte_entropy - length_entropy|`, or 0 when byte analysis was skipped
pub fn delta_entropy(bytes: Option<&ByteEntropyResult>, length_entropy: f64) -> f64 {
    bytes
        .map(|b| (b.byte_entropy - length_entropy).abs())
        .unwrap_or(0.0)
}

/// Pure, stateless composite scorer
#[derive(Debug, Clone, Copy)]
pub struct ScoreEngine {
    weights: ScoreWeights,
    normalization: Normalization,
}

impl ScoreEngine {
    pub fn new() -> Self {
        Self {
            weights: SCORE_WEIGHTS,
            normalization: DEFAULT_NORMALIZATION,
        }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    /// Weighted entropy score, rounded to [`SCORE_DECIMALS`] places
    pub fn score(&self, summary: &StatisticalSummary, metrics: &SystemMetricsSample) -> f64 {
        let w = &self.weights;
        let n = &self.normalization;

        let length_entropy = if summary.length_entropy > 0.0 {
            (summary.length_entropy / 8.0).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let cpu = if metrics.cpu_usage_percent > 0.0 {
            (metrics.cpu_usage_percent / 100.0).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let mem_used = (metrics.mem_used_kb as f64 / MEM_USED_SCALE_KB).clamp(0.0, 1.0);
        let mem_free_inverse =
            (1.0 - (metrics.mem_free_kb as f64 / MEM_FREE_SCALE_KB).min(1.0)).clamp(0.0, 1.0);

        let raw = w.dirty_ratio * summary.dirty_ratio
            + w.length_entropy * length_entropy
            + w.zeroed_ratio * summary.zeroed_ratio
            + w.variance * (n.variance)(summary.variance)
            + w.std_deviation * (n.std_deviation)(summary.std_deviation)
            + w.mean_block_size * (n.mean_block_size)(summary.mean_block_size)
            + w.cpu_usage * cpu
            + w.mem_used * mem_used
            + w.mem_free_inverse * mem_free_inverse;

        round_to(raw, SCORE_DECIMALS)
    }

    /// Build the full row for one checkpoint
    pub fn compose(
        &self,
        vm_id: &str,
        timestamp: DateTime<Utc>,
        summary: &StatisticalSummary,
        bytes: Option<&ByteEntropyResult>,
        metrics: &SystemMetricsSample,
    ) -> CompositeScore {
        let byte = bytes.copied().unwrap_or_default();

        CompositeScore {
            vm_id: vm_id.to_string(),
            timestamp,
            entropy_score: self.score(summary, metrics),
            mean_block_size: summary.mean_block_size,
            variance: summary.variance,
            std_deviation: summary.std_deviation,
            zeroed_ratio: summary.zeroed_ratio,
            dirty_ratio: summary.dirty_ratio,
            shannon_entropy: summary.length_entropy,
            delta_entropy: delta_entropy(bytes, summary.length_entropy),
            byte_entropy: byte.byte_entropy,
            chi_square: byte.chi_square,
            cpu_usage: metrics.cpu_usage_percent,
            mem_free_kb: metrics.mem_free_kb,
            mem_used_kb: metrics.mem_used_kb,
        }
    }
}

impl Default for ScoreEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_dispersion_terms_contribute_fixed_constant() {
        let engine = ScoreEngine::new();
        let metrics = SystemMetricsSample {
            cpu_usage_percent: 0.0,
            mem_free_kb: MEM_FREE_SCALE_KB as u64,
            mem_used_kb: 0,
        };

        let flat = StatisticalSummary::default();
        let wild = StatisticalSummary {
            variance: 1e18,
            std_deviation: 1e9,
            mean_block_size: 1e7,
            ..StatisticalSummary::default()
        };

        // 0.02 + 0.02 + 0.01 regardless of the dispersion statistics
        assert!(approx(engine.score(&flat, &metrics), 0.05));
        assert!(approx(engine.score(&wild, &metrics), 0.05));
    }

    #[test]
    fn test_zeroed_metrics_score() {
        // Zero free memory saturates the inverse term
        let engine = ScoreEngine::new();
        let score = engine.score(&StatisticalSummary::default(), &SystemMetricsSample::zeroed());
        assert!(approx(score, 0.055));
    }

    #[test]
    fn test_half_dirty_half_zeroed_example() {
        let engine = ScoreEngine::new();
        let summary = StatisticalSummary {
            length_entropy: 0.0,
            mean_block_size: 100.0,
            variance: 0.0,
            std_deviation: 0.0,
            zeroed_ratio: 0.5,
            dirty_ratio: 0.5,
        };
        // 0.425 + 0.015 + 0.05 + 0.005
        let score = engine.score(&summary, &SystemMetricsSample::zeroed());
        assert!(approx(score, 0.495));
    }

    #[test]
    fn test_saturating_terms_are_clamped() {
        let engine = ScoreEngine::new();
        let summary = StatisticalSummary {
            length_entropy: 64.0,
            dirty_ratio: 1.0,
            zeroed_ratio: 1.0,
            ..StatisticalSummary::default()
        };
        let metrics = SystemMetricsSample {
            cpu_usage_percent: 250.0,
            mem_free_kb: 0,
            mem_used_kb: u64::MAX / 2,
        };
        assert!(approx(engine.score(&summary, &metrics), 1.0));
    }

    #[test]
    fn test_score_is_rounded_and_repeatable() {
        let engine = ScoreEngine::new();
        let summary = StatisticalSummary {
            length_entropy: 1.2345678,
            mean_block_size: 4096.0,
            variance: 12.0,
            std_deviation: 3.4641,
            zeroed_ratio: 0.1234567,
            dirty_ratio: 0.7654321,
        };
        let metrics = SystemMetricsSample {
            cpu_usage_percent: 37.5,
            mem_free_kb: 2 * 1024 * 1024,
            mem_used_kb: 512 * 1024,
        };

        let first = engine.score(&summary, &metrics);
        let second = engine.score(&summary, &metrics);
        assert_eq!(first, second);
        assert_eq!(round_to(first, SCORE_DECIMALS), first);
    }

    #[test]
    fn test_compose_without_bytes_leaves_byte_fields_zero() {
        let engine = ScoreEngine::new();
        let summary = StatisticalSummary {
            length_entropy: 2.0,
            ..StatisticalSummary::default()
        };
        let row = engine.compose(
            "vm-1",
            Utc::now(),
            &summary,
            None,
            &SystemMetricsSample::zeroed(),
        );
        assert_eq!(row.byte_entropy, 0.0);
        assert_eq!(row.chi_square, 0.0);
        assert_eq!(row.delta_entropy, 0.0);
        assert_eq!(row.shannon_entropy, 2.0);
    }

    #[test]
    fn test_compose_with_bytes_sets_delta() {
        let engine = ScoreEngine::new();
        let summary = StatisticalSummary {
            length_entropy: 2.5,
            ..StatisticalSummary::default()
        };
        let bytes = ByteEntropyResult {
            byte_entropy: 7.9,
            chi_square: 120.0,
        };
        let row = engine.compose(
            "vm-1",
            Utc::now(),
            &summary,
            Some(&bytes),
            &SystemMetricsSample::zeroed(),
        );
        assert!(approx(row.delta_entropy, 5.4));
        assert_eq!(row.byte_entropy, 7.9);
        assert_eq!(row.chi_square, 120.0);
        // Byte figures do not feed the weighted score
        assert_eq!(
            row.entropy_score,
            engine.score(&summary, &SystemMetricsSample::zeroed())
        );
    }
}
