//! Weight and normalization tables for the composite score

/// Weights of each normalized term. Policy, not runtime tunable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub dirty_ratio: f64,
    pub length_entropy: f64,
    pub zeroed_ratio: f64,
    pub variance: f64,
    pub std_deviation: f64,
    pub mean_block_size: f64,
    pub cpu_usage: f64,
    pub mem_used: f64,
    pub mem_free_inverse: f64,
}

pub const SCORE_WEIGHTS: ScoreWeights = ScoreWeights {
    dirty_ratio: 0.85,
    length_entropy: 0.05,
    zeroed_ratio: 0.03,
    variance: 0.02,
    std_deviation: 0.02,
    mean_block_size: 0.01,
    cpu_usage: 0.01,
    mem_used: 0.005,
    mem_free_inverse: 0.005,
};

/// Used memory at which the memory-pressure term saturates (1 GiB in KB)
pub const MEM_USED_SCALE_KB: f64 = 1024.0 * 1024.0;

/// Free memory at which the free-memory term reaches zero (8 GiB in KB)
pub const MEM_FREE_SCALE_KB: f64 = 8.0 * 1024.0 * 1024.0;

/// Normalizes a raw dispersion statistic into [0, 1]
pub type NormalizeFn = fn(f64) -> f64;

/// Normalization functions for the dispersion terms
#[derive(Debug, Clone, Copy)]
pub struct Normalization {
    pub variance: NormalizeFn,
    pub std_deviation: NormalizeFn,
    pub mean_block_size: NormalizeFn,
}

/// Ignores its input and returns 1.0.
///
/// The dispersion terms therefore add a fixed 0.05 to every score and do
/// not discriminate between checkpoints. Replacing this in
/// [`DEFAULT_NORMALIZATION`] changes scoring for every VM.
pub fn constant_unit(_value: f64) -> f64 {
    1.0
}

pub const DEFAULT_NORMALIZATION: Normalization = Normalization {
    variance: constant_unit,
    std_deviation: constant_unit,
    mean_block_size: constant_unit,
};

impl Default for Normalization {
    fn default() -> Self {
        DEFAULT_NORMALIZATION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_one() {
        let w = SCORE_WEIGHTS;
        let sum = w.dirty_ratio
            + w.length_entropy
            + w.zeroed_ratio
            + w.variance
            + w.std_deviation
            + w.mean_block_size
            + w.cpu_usage
            + w.mem_used
            + w.mem_free_inverse;
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_unit_ignores_input() {
        assert_eq!(constant_unit(0.0), 1.0);
        assert_eq!(constant_unit(1e12), 1.0);
        assert_eq!(constant_unit(-3.0), 1.0);
    }
}
