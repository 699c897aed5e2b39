//! Byte-level entropy analysis
//!
//! Builds a 256-bucket histogram over the changed bytes of a checkpoint
//! and derives Shannon entropy (bits per byte) and the chi-square
//! statistic against a uniform byte distribution. Input can be streamed
//! from async readers in bounded chunks, so extents larger than memory
//! are supported.

mod histogram;
mod stream;

pub use histogram::{analyze_bytes, analyze_parallel, ByteHistogram};
pub use stream::{accumulate_reader, analyze_extents, DEFAULT_CHUNK_BYTES};
