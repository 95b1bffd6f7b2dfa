//! Per-block bookkeeping `ChainStore` persists alongside each block:
//! cumulative difficulty/work and the NIPoPoW superblock-count ladder
//! `Blockchain::prove` walks to find a "good" superchain (spec.md §4.1,
//! GLOSSARY "Interlink").

use std::io::{Cursor, Read};
use std::str::FromStr;

use nimiq_database::{AsDatabaseBytes, FromDatabaseBytes};
use nimiq_hash::{Blake2bHash, Hash};
use nimiq_primitives::block::{hash_to_target, real_difficulty, Block, Difficulty};

/// Cumulative count of blocks whose hash cleared each superblock depth,
/// i.e. `counts[d]` is how many blocks so far qualify at depth `d` or
/// shallower. `Blockchain::prove` uses `get_candidate_depth` to bound how
/// deep it needs to search for a depth whose superchain is already long
/// enough to be worth checking for "good"-ness.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SuperBlockCounts(Vec<u32>);

impl SuperBlockCounts {
    pub fn new() -> Self {
        SuperBlockCounts(Vec::new())
    }

    pub fn get(&self, depth: u8) -> u32 {
        self.0.get(depth as usize).copied().unwrap_or(0)
    }

    /// The counts after appending one more block whose hash cleared `depth`.
    pub fn next(&self, depth: u8) -> SuperBlockCounts {
        let needed = depth as usize + 1;
        let mut counts = self.0.clone();
        if counts.len() < needed {
            counts.resize(needed, 0);
        }
        for count in counts.iter_mut().take(needed) {
            *count += 1;
        }
        SuperBlockCounts(counts)
    }

    /// The deepest level whose cumulative count has already reached `m`.
    pub fn get_candidate_depth(&self, m: u32) -> u8 {
        for depth in (0..self.0.len()).rev() {
            if self.0[depth] >= m {
                return depth as u8;
            }
        }
        0
    }
}

/// Whether a `ChainStore` entry carries real cumulative totals or is a
/// lookup-only sentinel. The Chain Suffix Applier stores every prefix
/// block except the prefix head this way: the block is known (so the
/// store can answer `getChainData`/hash lookups for interlink/ancestor
/// checks) but must never be extended, since there is no verified path
/// from it back to genesis (spec.md §3 invariant 3, §4.2). A plain
/// `total_difficulty = -1` sentinel would work too (and is what the
/// distilled source does) but overloads a numeric field; a tagged variant
/// makes "not extendable" a type-level fact instead of a magic number
/// (spec.md §9 design notes).
#[derive(Clone, Debug, PartialEq)]
pub enum ChainState {
    Extendable { total_difficulty: Difficulty, total_work: Difficulty },
    LookupOnly,
}

impl ChainState {
    pub fn is_extendable(&self) -> bool {
        matches!(self, ChainState::Extendable { .. })
    }

    pub fn total_difficulty(&self) -> Option<&Difficulty> {
        match self {
            ChainState::Extendable { total_difficulty, .. } => Some(total_difficulty),
            ChainState::LookupOnly => None,
        }
    }

    pub fn total_work(&self) -> Option<&Difficulty> {
        match self {
            ChainState::Extendable { total_work, .. } => Some(total_work),
            ChainState::LookupOnly => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChainInfo {
    pub head: Block,
    pub state: ChainState,
    pub on_main_chain: bool,
    pub main_chain_successor: Option<Blake2bHash>,
    pub super_block_counts: SuperBlockCounts,
}

impl ChainInfo {
    pub fn initial(head: Block) -> Self {
        let hash = head.hash();
        let depth = hash_to_target(&hash).get_depth();
        let total_difficulty = head.difficulty();
        let total_work = real_difficulty(&hash);
        ChainInfo {
            head,
            state: ChainState::Extendable { total_difficulty, total_work },
            on_main_chain: true,
            main_chain_successor: None,
            super_block_counts: SuperBlockCounts::new().next(depth),
        }
    }

    /// Extend this (extendable) entry with its immediate successor,
    /// accumulating totals and the superblock ladder forward.
    pub fn next(&self, block: Block) -> ChainInfo {
        let (total_difficulty, total_work) = match &self.state {
            ChainState::Extendable { total_difficulty, total_work } => (total_difficulty.clone(), total_work.clone()),
            ChainState::LookupOnly => panic!("cannot extend a lookup-only chain entry"),
        };
        let hash = block.hash();
        let depth = hash_to_target(&hash).get_depth();
        ChainInfo {
            state: ChainState::Extendable {
                total_difficulty: total_difficulty + block.difficulty(),
                total_work: total_work + real_difficulty(&hash),
            },
            super_block_counts: self.super_block_counts.next(depth),
            head: block,
            on_main_chain: false,
            main_chain_successor: None,
        }
    }

    /// Construct the entry for the immediate predecessor of an
    /// already-known (extendable) `successor`, by subtracting the
    /// successor's own contribution from its cumulative totals (spec.md
    /// §4.4 "Totals, reverse direction"). Used by the Reverse Block
    /// Applier's prepend operation. Unlike `next`, this does not extend the
    /// superblock ladder: NIPoPoW proving only ever walks forward from a
    /// fully synced chain, so prepended entries carry an empty ladder.
    pub fn prepend(head: Block, successor: &ChainInfo) -> ChainInfo {
        let (total_difficulty, total_work) = match &successor.state {
            ChainState::Extendable { total_difficulty, total_work } => (total_difficulty.clone(), total_work.clone()),
            ChainState::LookupOnly => panic!("cannot prepend in front of a lookup-only successor"),
        };
        let successor_hash = successor.head.hash();
        ChainInfo {
            state: ChainState::Extendable {
                total_difficulty: total_difficulty - successor.head.difficulty(),
                total_work: total_work - real_difficulty(&successor_hash),
            },
            main_chain_successor: Some(successor_hash),
            head,
            on_main_chain: true,
            super_block_counts: SuperBlockCounts::new(),
        }
    }

    /// A prefix block other than the prefix head: known only for lookup
    /// (interlink/ancestor checks), never extendable (spec.md §4.2 step 1).
    pub fn lookup_only(head: Block) -> ChainInfo {
        ChainInfo {
            head,
            state: ChainState::LookupOnly,
            on_main_chain: true,
            main_chain_successor: None,
            super_block_counts: SuperBlockCounts::new(),
        }
    }
}

/// Manual byte encoding so `ChainInfo` can live in `nimiq_database`'s
/// generic key-value store despite carrying a `BigDecimal` (`Difficulty`),
/// which has no `beserial::Serialize` impl of its own - implementing
/// `AsDatabaseBytes`/`FromDatabaseBytes` directly, rather than through
/// `beserial`, is exactly what those two traits are for.
impl AsDatabaseBytes for ChainInfo {
    fn as_database_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_bytes(&mut buf, &beserial_encode(&self.head));
        match &self.state {
            ChainState::Extendable { total_difficulty, total_work } => {
                buf.push(1);
                write_string(&mut buf, &total_difficulty.to_string());
                write_string(&mut buf, &total_work.to_string());
            }
            ChainState::LookupOnly => {
                buf.push(0);
            }
        }
        buf.push(self.on_main_chain as u8);
        match &self.main_chain_successor {
            Some(hash) => {
                buf.push(1);
                buf.extend_from_slice(hash.as_bytes());
            }
            None => buf.push(0),
        }
        buf.extend_from_slice(&(self.super_block_counts.0.len() as u32).to_be_bytes());
        for count in &self.super_block_counts.0 {
            buf.extend_from_slice(&count.to_be_bytes());
        }
        buf
    }
}

impl FromDatabaseBytes for ChainInfo {
    fn from_database_bytes(bytes: &[u8]) -> Self {
        let mut cursor = Cursor::new(bytes);
        let head: Block = beserial_decode(&read_bytes(&mut cursor));
        let state = if read_u8(&mut cursor) != 0 {
            let total_difficulty = Difficulty::from_str(&read_string(&mut cursor)).expect("corrupted chain store entry");
            let total_work = Difficulty::from_str(&read_string(&mut cursor)).expect("corrupted chain store entry");
            ChainState::Extendable { total_difficulty, total_work }
        } else {
            ChainState::LookupOnly
        };
        let on_main_chain = read_u8(&mut cursor) != 0;
        let main_chain_successor = if read_u8(&mut cursor) != 0 {
            let mut hash_bytes = [0u8; 32];
            cursor.read_exact(&mut hash_bytes).expect("corrupted chain store entry");
            Some(Blake2bHash::from(hash_bytes))
        } else {
            None
        };
        let count_len = read_u32(&mut cursor) as usize;
        let mut counts = Vec::with_capacity(count_len);
        for _ in 0..count_len {
            counts.push(read_u32(&mut cursor));
        }
        ChainInfo {
            head,
            state,
            on_main_chain,
            main_chain_successor,
            super_block_counts: SuperBlockCounts(counts),
        }
    }
}

fn beserial_encode<T: beserial::Serialize>(value: &T) -> Vec<u8> {
    let mut buf = Vec::with_capacity(value.serialized_size());
    value.serialize(&mut buf).expect("writing to a Vec cannot fail");
    buf
}

fn beserial_decode<T: beserial::Deserialize>(bytes: &[u8]) -> T {
    let mut cursor = Cursor::new(bytes);
    T::deserialize(&mut cursor).expect("corrupted chain store entry")
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_bytes(buf, s.as_bytes());
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> Vec<u8> {
    let len = read_u32(cursor) as usize;
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes).expect("corrupted chain store entry");
    bytes
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> String {
    String::from_utf8(read_bytes(cursor)).expect("corrupted chain store entry")
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> u8 {
    let mut b = [0u8; 1];
    cursor.read_exact(&mut b).expect("corrupted chain store entry");
    b[0]
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> u32 {
    let mut b = [0u8; 4];
    cursor.read_exact(&mut b).expect("corrupted chain store entry");
    u32::from_be_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_roundtrips_through_database_bytes() {
        let genesis = nimiq_primitives::networks::get_network_info(nimiq_primitives::networks::NetworkId::Dev)
            .unwrap()
            .genesis_block;
        let info = ChainInfo::initial(genesis);
        let bytes = info.as_database_bytes();
        let restored = ChainInfo::from_database_bytes(&bytes);
        assert_eq!(restored.head, info.head);
        assert_eq!(restored.state, info.state);
        assert_eq!(restored.on_main_chain, info.on_main_chain);
    }

    #[test]
    fn it_roundtrips_lookup_only_entries() {
        let genesis = nimiq_primitives::networks::get_network_info(nimiq_primitives::networks::NetworkId::Dev)
            .unwrap()
            .genesis_block;
        let info = ChainInfo::lookup_only(genesis);
        assert!(!info.state.is_extendable());
        let bytes = info.as_database_bytes();
        let restored = ChainInfo::from_database_bytes(&bytes);
        assert_eq!(restored.state, ChainState::LookupOnly);
    }

    #[test]
    fn super_block_counts_accumulate_at_every_shallower_depth() {
        let counts = SuperBlockCounts::new().next(2);
        assert_eq!(counts.get(0), 1);
        assert_eq!(counts.get(1), 1);
        assert_eq!(counts.get(2), 1);
        assert_eq!(counts.get(3), 0);

        let counts = counts.next(0);
        assert_eq!(counts.get(0), 2);
        assert_eq!(counts.get(1), 1);
    }
}
