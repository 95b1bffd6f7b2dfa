//! The NIPoPoW-style chain proof produced by `Blockchain::get_chain_proof`
//! and consumed by `nimiq-consensus`'s Proof Evaluator (spec.md §3
//! "ChainProof", §4.1).

use beserial::{Deserialize, Serialize};
use nimiq_hash::{Blake2bHash, Hash};
use nimiq_primitives::block::{Block, BlockHeader};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainProof {
    #[beserial(len_type(u32))]
    pub prefix: Vec<Block>,
    #[beserial(len_type(u32))]
    pub suffix: Vec<BlockHeader>,
}

impl ChainProof {
    /// Structural self-consistency of the prefix: proof-of-work and
    /// interlink-hash sanity on every entry, strictly increasing heights,
    /// each entry reachable from its predecessor either directly
    /// (`prev_hash`) or via the predecessor's interlink back-pointers, and
    /// the suffix picking up immediately where the prefix left off. This
    /// is the "(c) the prefix self-verifies" clause of spec.md §3; the
    /// suffix-length and per-header interlink checks ((a) and (b)) are
    /// the Proof Evaluator's job, not this method's (spec.md §4.1).
    pub fn verify(&self) -> bool {
        if self.prefix.is_empty() {
            return false;
        }

        for block in &self.prefix {
            if !block.header.verify_proof_of_work() {
                return false;
            }
            if block.header.interlink_hash != block.interlink.hash() {
                return false;
            }
        }

        for pair in self.prefix.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.header.height <= prev.header.height {
                return false;
            }
            let prev_hash = prev.hash();
            let directly_linked = next.header.prev_hash == prev_hash;
            let interlinked = next.interlink.hashes.contains(&prev_hash);
            if !directly_linked && !interlinked {
                return false;
            }
        }

        if let Some(first_suffix) = self.suffix.first() {
            let prefix_head = self.prefix.last().expect("checked non-empty above");
            if first_suffix.prev_hash != prefix_head.hash() {
                return false;
            }
        }

        for pair in self.suffix.windows(2) {
            if !pair[1].is_immediate_successor_of(&pair[0]) {
                return false;
            }
        }

        true
    }
}

/// The deepest block present in both prefixes, matched by (height, hash).
/// Proof prefixes are sparse samples of the same genesis-rooted chain, so
/// any two prefixes that descend from a common history share at least the
/// genesis entry; this returns `None` only when the two prefixes share no
/// height/hash pair at all (spec.md §4.1 "isBetterProof", §9 design
/// notes).
pub fn lowest_common_ancestor(a: &[Block], b: &[Block]) -> Option<Block> {
    use std::collections::HashMap;

    let a_hashes: HashMap<(u32, Blake2bHash), &Block> = a.iter().map(|block| ((block.header.height, block.hash()), block)).collect();

    b.iter()
        .rev()
        .find_map(|block| a_hashes.get(&(block.header.height, block.hash())).map(|found| (*found).clone()))
}
