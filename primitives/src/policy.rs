//! Consensus-rule constants. `K`, `M` and `NUM_BLOCKS_VERIFICATION` are the
//! NIPoPoW / sync parameters the Proof Evaluator and Reverse Block Applier
//! need to agree on with whatever produced the proof (`Blockchain::prove`
//! in the `blockchain` crate uses the same `K`/`M` under the names
//! `NIPOPOW_K`/`NIPOPOW_M`).

use std::str::FromStr;

use bigdecimal::BigDecimal;
use lazy_static::lazy_static;
use num_bigint::BigUint;

/// Sparse-prefix / dense-suffix split of a chain proof: the suffix is the
/// last `K` blocks of the chain, carried as full headers.
pub const K: u32 = 120;

/// Security parameter for the good-superchain score: how many highest-depth
/// blocks must accumulate before the scoring walk stops.
pub const M: u32 = 240;

/// Local-quality slack used when the prover decides a superchain is "good".
pub const DELTA: f64 = 0.15;

/// How many full blocks must be reverse-applied from the proof head before
/// PLCS considers itself caught up to the pre-sync tip.
pub const NUM_BLOCKS_VERIFICATION: u32 = 250;

pub const DIFFICULTY_BLOCK_WINDOW: u32 = 120;
pub const BLOCK_TIME: u32 = 60;
pub const DIFFICULTY_MAX_ADJUSTMENT_FACTOR: f64 = 2.0;
pub const TRANSACTION_VALIDITY_WINDOW: u32 = 120;

lazy_static! {
    /// Difficulty-1 target: the easiest target any block may have.
    pub static ref BLOCK_TARGET_MAX: BigUint = (BigUint::from(1u32) << 240u32) - BigUint::from(1u32);
    pub static ref BLOCK_TARGET_MAX_DECIMAL: BigDecimal = BigDecimal::from_str(&BLOCK_TARGET_MAX.to_str_radix(10)).expect("constant is always a valid decimal");
}
