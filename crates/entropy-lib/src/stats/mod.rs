//! Block-change statistics
//!
//! Turns a checkpoint's change records into length-based summary
//! statistics: Shannon entropy of the length distribution, mean, sample
//! variance and byte-weighted dirty/zeroed ratios.

mod coerce;
mod extractor;

pub use coerce::{coerce_records, parse_flag, parse_offset, CoercionOutcome};
pub use extractor::{length_entropy, summarize, summarize_raw};
