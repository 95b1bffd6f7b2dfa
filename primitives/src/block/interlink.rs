use std::io;

use beserial::{Deserialize, Serialize};
use nimiq_hash::{Blake2bHash, Hash, SerializeContent};

use crate::block::Target;

/// NIPoPoW back-pointers: `hashes[i]` is the most recent ancestor (possibly
/// this block itself) whose hash cleared a target `i` levels deeper than
/// nominal. Chain proofs walk these to sample a sparse prefix in
/// logarithmic space (spec.md GLOSSARY, "Interlink").
#[derive(Clone, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Interlink {
    #[beserial(len_type(u8))]
    pub hashes: Vec<Blake2bHash>,
}

impl SerializeContent for Interlink {
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        Ok(Serialize::serialize(self, writer)?)
    }
}

impl Hash for Interlink {}

impl Interlink {
    /// Build the interlink the *next* block (mined with `own_hash` as its
    /// predecessor and `next_target` as its own difficulty target) should
    /// carry: every level up to and including the depth `own_hash` cleared
    /// is replaced with `own_hash`; deeper levels are carried over
    /// unchanged.
    pub fn next(&self, own_hash: &Blake2bHash, own_depth: u8, next_target: &Target) -> Interlink {
        let _ = next_target; // the next block's target only bounds how many levels matter further downstream
        let mut hashes = Vec::with_capacity(self.hashes.len().max(own_depth as usize + 1));
        for _ in 0..=own_depth {
            hashes.push(own_hash.clone());
        }
        if (own_depth as usize) < self.hashes.len() {
            hashes.extend_from_slice(&self.hashes[own_depth as usize + 1..]);
        }
        Interlink { hashes }
    }
}
