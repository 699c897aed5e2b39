//! Composite score engine
//!
//! Fuses length statistics, byte entropy and hypervisor load into one
//! deterministic risk score using a fixed weight table.

mod engine;
mod weights;

pub use engine::{delta_entropy, round_to, ScoreEngine, SCORE_DECIMALS};
pub use weights::{
    constant_unit, NormalizeFn, Normalization, ScoreWeights, DEFAULT_NORMALIZATION, MEM_FREE_SCALE_KB,
    MEM_USED_SCALE_KB, SCORE_WEIGHTS,
};
