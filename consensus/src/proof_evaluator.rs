//! Proof Evaluator (spec.md §4.1): decides whether a chain proof is
//! structurally valid and, if so, whether it beats whatever proof the
//! synchronizer currently holds. `ChainProof::verify` (in `nimiq-blockchain`)
//! only covers the prefix's own self-consistency; the suffix-length and
//! per-header interlink checks are this module's job.

use std::collections::HashMap;

use nimiq_blockchain::{lowest_common_ancestor, ChainProof};
use nimiq_hash::Hash;
use nimiq_primitives::block::{hash_to_target, Block, BlockHeader, Difficulty, Target};
use nimiq_primitives::policy;

pub struct ProofEvaluator;

impl ProofEvaluator {
    /// Checks `proof.verify()`, the suffix length (must be `K` or, for a
    /// chain shorter than that, `head.height - 1`), and that every suffix
    /// header's declared interlink hash matches the interlink obtained by
    /// stepping the previous block forward with that header's own target.
    /// On success, returns the suffix reconstructed as header+interlink
    /// blocks (no bodies - the suffix never carries them).
    pub fn verify(proof: &ChainProof) -> Option<Vec<Block>> {
        if !proof.verify() {
            return None;
        }

        let prefix_head = proof.prefix.last().expect("ChainProof::verify rejects an empty prefix");
        let head_height = match proof.suffix.last() {
            Some(header) => header.height,
            None => prefix_head.header.height,
        };

        let suffix_len = proof.suffix.len() as u32;
        if suffix_len != policy::K && suffix_len != head_height.saturating_sub(1) {
            return None;
        }

        let mut reconstructed = Vec::with_capacity(proof.suffix.len());
        let mut prev = prefix_head.clone();
        for header in &proof.suffix {
            let next_target = Target::from(header.n_bits);
            let interlink = prev.get_next_interlink(&next_target);
            if interlink.hash() != header.interlink_hash {
                return None;
            }

            let block = Block {
                header: header.clone(),
                interlink,
                body: None,
            };
            reconstructed.push(block.clone());
            prev = block;
        }

        Some(reconstructed)
    }

    /// True when `new` should replace `current` as the proof the
    /// synchronizer is working from. Compares the good-superchain score of
    /// both prefixes above their lowest common ancestor; ties are broken by
    /// total suffix difficulty, with the new proof favored on an exact tie
    /// so repeatedly feeding the same proof converges instead of
    /// oscillating (spec.md §4.1, §9 design notes).
    pub fn is_better_proof(new: &ChainProof, current: &ChainProof, m: u32) -> bool {
        let lca_height = lowest_common_ancestor(&new.prefix, &current.prefix).map(|block| block.header.height).unwrap_or(0);

        let new_score = Self::score(&new.prefix, lca_height, m);
        let current_score = Self::score(&current.prefix, lca_height, m);

        if new_score != current_score {
            return new_score > current_score;
        }

        Self::suffix_total_difficulty(&new.suffix) >= Self::suffix_total_difficulty(&current.suffix)
    }

    /// The good-superchain score above `lca_height`: accumulate per-depth
    /// block counts from the deepest populated level down until `m` blocks
    /// have been seen, then weight that count by `2^stopping_depth`.
    fn score(prefix: &[Block], lca_height: u32, m: u32) -> u128 {
        let mut counts: HashMap<u8, u32> = HashMap::new();
        let mut max_depth = 0u8;
        for block in prefix {
            if block.header.height < lca_height {
                continue;
            }
            let depth = hash_to_target(&block.hash()).get_depth();
            *counts.entry(depth).or_insert(0) += 1;
            max_depth = max_depth.max(depth);
        }

        let mut sum = 0u32;
        let mut stopping_depth = 0u8;
        for depth in (0..=max_depth).rev() {
            sum += counts.get(&depth).copied().unwrap_or(0);
            if sum >= m {
                stopping_depth = depth;
                break;
            }
        }

        2u128.pow(stopping_depth as u32) * sum as u128
    }

    fn suffix_total_difficulty(suffix: &[BlockHeader]) -> Difficulty {
        suffix.iter().fold(Difficulty::from(0), |acc, header| acc + Target::from(header.n_bits).difficulty())
    }
}
