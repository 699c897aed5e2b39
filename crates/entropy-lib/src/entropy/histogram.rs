//! Byte frequency histogram

use crate::error::{AnalysisError, Result};
use crate::models::ByteEntropyResult;
use rayon::prelude::*;

const BUCKETS: usize = 256;

/// Frequency histogram over byte values.
///
/// Accumulation is associative and commutative, so partial histograms of
/// separate chunks can be merged by summing buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteHistogram {
    counts: [u64; BUCKETS],
    total: u64,
}

impl ByteHistogram {
    pub fn new() -> Self {
        Self {
            counts: [0; BUCKETS],
            total: 0,
        }
    }

    /// Add a chunk of bytes
    pub fn update(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            self.counts[byte as usize] += 1;
        }
        self.total += chunk.len() as u64;
    }

    /// Fold another histogram into this one
    pub fn merge(&mut self, other: &ByteHistogram) {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts.iter()) {
            *mine += theirs;
        }
        self.total += other.total;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn count(&self, byte: u8) -> u64 {
        self.counts[byte as usize]
    }

    /// Shannon entropy in bits per byte; 0 for an empty histogram
    pub fn entropy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let n = self.total as f64;
        let entropy: f64 = self
            .counts
            .iter()
            .filter(|&&count| count > 0)
            .map(|&count| {
                let p = count as f64 / n;
                -p * p.log2()
            })
            .sum();
        entropy.clamp(0.0, 8.0)
    }

    /// Chi-square statistic against a uniform distribution over all buckets
    pub fn chi_square(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let expected = self.total as f64 / BUCKETS as f64;
        self.counts
            .iter()
            .map(|&count| {
                let diff = count as f64 - expected;
                diff * diff / expected
            })
            .sum()
    }

    /// Final figures, or `EmptyBuffer` if nothing was accumulated
    pub fn finish(&self) -> Result<ByteEntropyResult> {
        if self.is_empty() {
            return Err(AnalysisError::EmptyBuffer);
        }
        Ok(ByteEntropyResult {
            byte_entropy: self.entropy(),
            chi_square: self.chi_square(),
        })
    }
}

impl Default for ByteHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Analyze an in-memory buffer
pub fn analyze_bytes(data: &[u8]) -> Result<ByteEntropyResult> {
    let mut histogram = ByteHistogram::new();
    histogram.update(data);
    histogram.finish()
}

/// Analyze an in-memory buffer by histogramming `chunk_size` slices in
/// parallel and merging the partial histograms.
pub fn analyze_parallel(data: &[u8], chunk_size: usize) -> Result<ByteEntropyResult> {
    if data.is_empty() {
        return Err(AnalysisError::EmptyBuffer);
    }

    let merged = data
        .par_chunks(chunk_size.max(1))
        .fold(ByteHistogram::new, |mut partial, chunk| {
            partial.update(chunk);
            partial
        })
        .reduce(ByteHistogram::new, |mut merged, partial| {
            merged.merge(&partial);
            merged
        });

    merged.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    #[test]
    fn test_uniform_buffer_has_max_entropy_and_zero_chi_square() {
        let data: Vec<u8> = (0..=255u8).collect();
        let result = analyze_bytes(&data).unwrap();
        assert!((result.byte_entropy - 8.0).abs() < TOLERANCE);
        assert!(result.chi_square.abs() < TOLERANCE);
    }

    #[test]
    fn test_repeated_uniform_buffer() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
        let result = analyze_bytes(&data).unwrap();
        assert!((result.byte_entropy - 8.0).abs() < TOLERANCE);
        assert!(result.chi_square.abs() < TOLERANCE);
    }

    #[test]
    fn test_identical_bytes_have_zero_entropy() {
        let data = vec![0xAAu8; 1000];
        let result = analyze_bytes(&data).unwrap();
        assert_eq!(result.byte_entropy, 0.0);
        // One bucket holds N, the others 0: chi = (N - e)^2/e + 255 * e
        let n = 1000.0f64;
        let e = n / 256.0;
        let expected = (n - e).powi(2) / e + 255.0 * e;
        assert!((result.chi_square - expected).abs() < 1e-6);
    }

    #[test]
    fn test_two_values_one_bit() {
        let data: Vec<u8> = (0..1000).map(|i| if i % 2 == 0 { 0 } else { 255 }).collect();
        let result = analyze_bytes(&data).unwrap();
        assert!((result.byte_entropy - 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_empty_buffer_is_signalled() {
        assert!(matches!(analyze_bytes(&[]), Err(AnalysisError::EmptyBuffer)));
        assert!(matches!(
            analyze_parallel(&[], 16),
            Err(AnalysisError::EmptyBuffer)
        ));
    }

    #[test]
    fn test_merge_matches_single_pass() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 251) as u8).collect();

        let mut whole = ByteHistogram::new();
        whole.update(&data);

        let mut left = ByteHistogram::new();
        let mut right = ByteHistogram::new();
        left.update(&data[..3333]);
        right.update(&data[3333..]);
        right.merge(&left);

        assert_eq!(whole, right);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let data: Vec<u8> = (0..100_000u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
            .collect();
        let sequential = analyze_bytes(&data).unwrap();
        let parallel = analyze_parallel(&data, 4096).unwrap();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_parallel_single_byte_chunks() {
        let data: Vec<u8> = (0..8192u32).map(|i| (i % 256) as u8).collect();
        let result = analyze_parallel(&data, 1).unwrap();
        assert!((result.byte_entropy - 8.0).abs() < TOLERANCE);
        assert!(result.chi_square.abs() < TOLERANCE);
        assert!(matches!(
            analyze_parallel(&[], 1),
            Err(AnalysisError::EmptyBuffer)
        ));
    }
}
