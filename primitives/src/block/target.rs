use std::str::FromStr;

use beserial::{Deserialize, Serialize};
use bigdecimal::BigDecimal;
use num_bigint::BigUint;
use num_traits::Zero;

use nimiq_hash::Blake2bHash;

use crate::policy;

/// A full-precision proof-of-work target: a block's hash, read as a
/// big-endian integer, must not exceed it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Target(pub(crate) BigUint);

/// The 4-byte "compact" (Bitcoin-`nBits`-style) encoding of a `Target`
/// that actually goes on the wire in a `BlockHeader`.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct TargetCompact(u32);

/// Cumulative proof-of-work, expressed as `BLOCK_TARGET_MAX / target` so
/// that difficulty scales linearly with work.
pub type Difficulty = BigDecimal;

impl Target {
    pub fn from_int(value: BigUint) -> Self {
        Target(value)
    }

    pub fn is_met_by(&self, hash: &Blake2bHash) -> bool {
        hash_to_uint(hash) <= self.0
    }

    /// Roughly `log2(BLOCK_TARGET_MAX / target)`, floored. Used both to
    /// decide which superblock level a block qualifies for when building
    /// an interlink, and as the per-block depth bucket in the NIPoPoW
    /// scoring rule (spec.md §4.1).
    pub fn get_depth(&self) -> u8 {
        if self.0.is_zero() {
            return 255;
        }
        let max_bits = policy::BLOCK_TARGET_MAX.bits();
        let bits = self.0.bits();
        max_bits.saturating_sub(bits) as u8
    }

    pub fn difficulty(&self) -> Difficulty {
        if self.0.is_zero() {
            return policy::BLOCK_TARGET_MAX_DECIMAL.clone();
        }
        let target_decimal = BigDecimal::from_str(&self.0.to_str_radix(10))
            .expect("BigUint decimal representation is always valid");
        policy::BLOCK_TARGET_MAX_DECIMAL.clone() / target_decimal
    }
}

pub fn hash_to_target(hash: &Blake2bHash) -> Target {
    Target(hash_to_uint(hash))
}

fn hash_to_uint(hash: &Blake2bHash) -> BigUint {
    BigUint::from_bytes_be(hash.as_bytes())
}

/// Work actually realized by a specific hash (as opposed to the nominal
/// difficulty implied by a block's declared target) - used to accumulate
/// `totalWork` the way spec.md §4.2/§4.4 describe.
pub fn real_difficulty(hash: &Blake2bHash) -> Difficulty {
    hash_to_target(hash).difficulty()
}

pub fn is_valid_target(target: &Target) -> bool {
    !target.0.is_zero() && target.0 <= *policy::BLOCK_TARGET_MAX
}

impl From<Difficulty> for Target {
    /// The inverse of `Target::difficulty`: `BLOCK_TARGET_MAX / difficulty`,
    /// floored to the nearest integer target. Used by difficulty retargeting
    /// to turn the newly computed average difficulty back into a target.
    fn from(difficulty: Difficulty) -> Self {
        if difficulty <= BigDecimal::from(0) {
            return Target(policy::BLOCK_TARGET_MAX.clone());
        }
        let target_decimal = policy::BLOCK_TARGET_MAX_DECIMAL.clone() / difficulty;
        Target(biguint_floor(&target_decimal))
    }
}

/// Truncate a non-negative `BigDecimal` down to its integer part. `bigdecimal`
/// 0.0.14 has no direct `BigDecimal -> BigUint` conversion, so this goes
/// through the decimal string representation instead.
fn biguint_floor(value: &BigDecimal) -> BigUint {
    let s = value.to_string();
    let integer_part = s.split('.').next().unwrap_or("0").trim_start_matches('-');
    if integer_part.is_empty() {
        BigUint::from(0u32)
    } else {
        BigUint::from_str(integer_part).unwrap_or_else(|_| BigUint::from(0u32))
    }
}

impl From<TargetCompact> for Target {
    fn from(compact: TargetCompact) -> Self {
        let bits = compact.0;
        let size = (bits >> 24) as usize;
        let word = bits & 0x00ff_ffff;
        let value = if size <= 3 {
            BigUint::from(word >> (8 * (3 - size)))
        } else {
            BigUint::from(word) << (8 * (size - 3))
        };
        Target(value)
    }
}

impl From<Target> for TargetCompact {
    fn from(target: Target) -> Self {
        TargetCompact::from(&target)
    }
}

impl From<&Target> for TargetCompact {
    fn from(target: &Target) -> Self {
        let mut bytes = target.0.to_bytes_be();
        if bytes.is_empty() {
            bytes.push(0);
        }
        let mut size = bytes.len();
        let mut word = if bytes.len() >= 3 {
            ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32)
        } else {
            let mut padded = vec![0u8; 3 - bytes.len()];
            padded.extend_from_slice(&bytes);
            ((padded[0] as u32) << 16) | ((padded[1] as u32) << 8) | (padded[2] as u32)
        };
        if word & 0x0080_0000 != 0 {
            word >>= 8;
            size += 1;
        }
        TargetCompact(((size as u32) << 24) | word)
    }
}

impl TargetCompact {
    pub fn from_compact(bits: u32) -> Self {
        TargetCompact(bits)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_roundtrips_compact_targets() {
        let target = Target::from(TargetCompact::from_compact(0x1f01_0000));
        let compact = TargetCompact::from(&target);
        assert_eq!(compact.as_u32(), 0x1f01_0000);
    }

    #[test]
    fn depth_increases_as_target_shrinks() {
        let easy = Target::from(TargetCompact::from_compact(0x1f01_0000));
        let hard = Target(easy.0.clone() >> 8u32);
        assert!(hard.get_depth() > easy.get_depth());
    }
}
