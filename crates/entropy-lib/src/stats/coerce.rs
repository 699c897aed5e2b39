//! Numeric coercion of raw change records

use crate::error::{AnalysisError, Result};
use crate::models::{BlockChangeRecord, RawChangeRecord};
use tracing::debug;

/// Records that survived coercion plus the number dropped
#[derive(Debug, Clone, Default)]
pub struct CoercionOutcome {
    pub records: Vec<BlockChangeRecord>,
    pub dropped: usize,
}

/// Parse an offset or length column.
///
/// Accepts unsigned integers and integral, finite, non-negative decimals
/// such as `"4096.0"`.
pub fn parse_offset(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<u64>() {
        return Some(value);
    }
    let value = trimmed.parse::<f64>().ok()?;
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64 {
        Some(value as u64)
    } else {
        None
    }
}

/// Parse a boolean flag column; unrecognized values read as `false`
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "t"
    )
}

fn coerce_record(raw: &RawChangeRecord) -> Result<BlockChangeRecord> {
    let start = parse_offset(&raw.start)
        .ok_or_else(|| AnalysisError::InvalidRecord(format!("non-numeric start {:?}", raw.start)))?;
    let length = parse_offset(&raw.length).ok_or_else(|| {
        AnalysisError::InvalidRecord(format!("non-numeric length {:?}", raw.length))
    })?;
    if length == 0 {
        return Err(AnalysisError::InvalidRecord(format!(
            "zero-length region at offset {}",
            start
        )));
    }

    Ok(BlockChangeRecord {
        start,
        length,
        dirty: parse_flag(&raw.dirty),
        zero: parse_flag(&raw.zero),
    })
}

/// Coerce raw records, dropping malformed rows
pub fn coerce_records(raw: &[RawChangeRecord]) -> CoercionOutcome {
    let mut outcome = CoercionOutcome {
        records: Vec::with_capacity(raw.len()),
        dropped: 0,
    };

    for (index, record) in raw.iter().enumerate() {
        match coerce_record(record) {
            Ok(parsed) => outcome.records.push(parsed),
            Err(e) => {
                outcome.dropped += 1;
                debug!(index = index, error = %e, "Dropping change record");
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offset_variants() {
        assert_eq!(parse_offset("4096"), Some(4096));
        assert_eq!(parse_offset(" 512 "), Some(512));
        assert_eq!(parse_offset("4096.0"), Some(4096));
        assert_eq!(parse_offset("4096.5"), None);
        assert_eq!(parse_offset("-1"), None);
        assert_eq!(parse_offset("NaN"), None);
        assert_eq!(parse_offset("abc"), None);
        assert_eq!(parse_offset(""), None);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("True"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("garbage"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn test_coerce_drops_invalid_rows() {
        let raw = vec![
            RawChangeRecord::new("0", "100", "true", "false"),
            RawChangeRecord::new("x", "100", "true", "false"),
            RawChangeRecord::new("100", "oops", "false", "true"),
            RawChangeRecord::new("200", "0", "false", "true"),
            RawChangeRecord::new("300", "50", "False", "True"),
        ];

        let outcome = coerce_records(&raw);
        assert_eq!(outcome.dropped, 3);
        assert_eq!(
            outcome.records,
            vec![
                BlockChangeRecord::new(0, 100, true, false),
                BlockChangeRecord::new(300, 50, false, true),
            ]
        );
    }
}
