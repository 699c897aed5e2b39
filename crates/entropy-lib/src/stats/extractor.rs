//! Length-based summary statistics

use super::coerce::coerce_records;
use crate::models::{BlockChangeRecord, RawChangeRecord, StatisticalSummary};
use std::collections::BTreeMap;

/// Shannon entropy (bits) of the discrete distribution of length values
pub fn length_entropy(lengths: &[u64]) -> f64 {
    if lengths.is_empty() {
        return 0.0;
    }

    let mut counts: BTreeMap<u64, usize> = BTreeMap::new();
    for &length in lengths {
        *counts.entry(length).or_insert(0) += 1;
    }

    let total = lengths.len() as f64;
    let entropy: f64 = counts
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum();

    // A single distinct value gives -0.0
    entropy.max(0.0)
}

/// Summarize coerced change records
pub fn summarize(records: &[BlockChangeRecord]) -> StatisticalSummary {
    if records.is_empty() {
        return StatisticalSummary::default();
    }

    let lengths: Vec<u64> = records.iter().map(|r| r.length).collect();
    let n = lengths.len() as f64;

    let total_length: f64 = lengths.iter().map(|&l| l as f64).sum();
    let mean = total_length / n;

    // Sample variance (Bessel's correction), two-pass for stability
    let variance = if lengths.len() > 1 {
        lengths
            .iter()
            .map(|&l| (l as f64 - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0)
    } else {
        0.0
    };

    let (zeroed_ratio, dirty_ratio) = if total_length > 0.0 {
        let zeroed: f64 = records
            .iter()
            .filter(|r| r.zero)
            .map(|r| r.length as f64)
            .sum();
        let dirty: f64 = records
            .iter()
            .filter(|r| r.dirty)
            .map(|r| r.length as f64)
            .sum();
        (
            (zeroed / total_length).clamp(0.0, 1.0),
            (dirty / total_length).clamp(0.0, 1.0),
        )
    } else {
        (0.0, 0.0)
    };

    StatisticalSummary {
        length_entropy: length_entropy(&lengths),
        mean_block_size: mean,
        variance,
        std_deviation: variance.sqrt(),
        zeroed_ratio,
        dirty_ratio,
    }
}

/// Coerce raw records and summarize the survivors.
///
/// Returns the summary together with the number of dropped records.
pub fn summarize_raw(raw: &[RawChangeRecord]) -> (StatisticalSummary, usize) {
    let outcome = coerce_records(raw);
    (summarize(&outcome.records), outcome.dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records_with_lengths(lengths: &[u64]) -> Vec<BlockChangeRecord> {
        lengths
            .iter()
            .enumerate()
            .map(|(i, &len)| BlockChangeRecord::new(i as u64 * 65536, len, false, false))
            .collect()
    }

    #[test]
    fn test_empty_records_yield_zero_summary() {
        let summary = summarize(&[]);
        assert_eq!(summary, StatisticalSummary::default());
    }

    #[test]
    fn test_single_distinct_length_has_zero_entropy() {
        let summary = summarize(&records_with_lengths(&[4096, 4096, 4096, 4096]));
        assert_eq!(summary.length_entropy, 0.0);
        assert_eq!(summary.variance, 0.0);
        assert_eq!(summary.std_deviation, 0.0);
        assert_eq!(summary.mean_block_size, 4096.0);
    }

    #[test]
    fn test_equally_frequent_lengths_give_log2_k() {
        for k in 1..=8u64 {
            let lengths: Vec<u64> = (1..=k).flat_map(|v| [v * 512, v * 512]).collect();
            let entropy = length_entropy(&lengths);
            assert!(
                (entropy - (k as f64).log2()).abs() < 1e-12,
                "k={} entropy={}",
                k,
                entropy
            );
        }
    }

    #[test]
    fn test_sample_variance_and_mean() {
        let summary = summarize(&records_with_lengths(&[2, 4, 4, 4, 5, 5, 7, 9]));
        assert!((summary.mean_block_size - 5.0).abs() < 1e-12);
        // Sum of squared deviations is 32, N - 1 = 7
        assert!((summary.variance - 32.0 / 7.0).abs() < 1e-12);
        assert!((summary.std_deviation - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_single_record_has_zero_variance() {
        let summary = summarize(&records_with_lengths(&[1000]));
        assert_eq!(summary.variance, 0.0);
        assert_eq!(summary.mean_block_size, 1000.0);
    }

    #[test]
    fn test_ratios_are_byte_weighted() {
        let records = vec![
            BlockChangeRecord::new(0, 100, true, false),
            BlockChangeRecord::new(100, 100, false, true),
        ];
        let summary = summarize(&records);
        assert_eq!(summary.dirty_ratio, 0.5);
        assert_eq!(summary.zeroed_ratio, 0.5);
        assert_eq!(summary.length_entropy, 0.0);

        let weighted = vec![
            BlockChangeRecord::new(0, 300, true, false),
            BlockChangeRecord::new(300, 100, false, false),
        ];
        let summary = summarize(&weighted);
        assert!((summary.dirty_ratio - 0.75).abs() < 1e-12);
        assert_eq!(summary.zeroed_ratio, 0.0);
    }

    #[test]
    fn test_ratios_are_independent() {
        let records = vec![
            BlockChangeRecord::new(0, 100, true, true),
            BlockChangeRecord::new(100, 100, true, true),
        ];
        let summary = summarize(&records);
        assert_eq!(summary.dirty_ratio, 1.0);
        assert_eq!(summary.zeroed_ratio, 1.0);
    }

    #[test]
    fn test_summarize_raw_counts_dropped_rows() {
        let raw = vec![
            RawChangeRecord::new("0", "100", "true", "false"),
            RawChangeRecord::new("100", "n/a", "true", "false"),
            RawChangeRecord::new("200", "100", "false", "true"),
        ];
        let (summary, dropped) = summarize_raw(&raw);
        assert_eq!(dropped, 1);
        assert_eq!(summary.dirty_ratio, 0.5);
        assert_eq!(summary.zeroed_ratio, 0.5);
    }
}
