//! Persistent lookup of `ChainInfo` by hash and by height, plus the main
//! chain head pointer. This is the `ChainDataStore` collaborator spec.md
//! §6 specifies (`getChainData`/`putChainData`/`getBlock`/`setHead`/
//! `truncate`), shared unchanged between the full `Blockchain` and
//! `nimiq-consensus`'s partial light chain synchronizer - both read and
//! write the same `ChainInfo` entries, which is exactly why `ChainInfo`
//! carries the `ChainState::LookupOnly` sentinel (spec.md §4.2) rather
//! than being a `Blockchain`-private type.

use nimiq_database::{Database, Environment, ReadTransaction, Transaction, WriteTransaction};
use nimiq_hash::{Blake2bHash, Hash};
use nimiq_primitives::block::Block;

use crate::chain_info::ChainInfo;

const CHAIN_DB: &str = "ChainData";
const HEIGHT_DB: &str = "Height";
const HEAD_DB: &str = "Head";
const HEAD_KEY: u8 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

pub struct ChainStore<'env> {
    env: &'env Environment,
    chain_db: Database,
    height_db: Database,
    head_db: Database,
}

impl<'env> ChainStore<'env> {
    pub fn new(env: &'env Environment) -> Self {
        ChainStore {
            env,
            chain_db: env.open_database(CHAIN_DB),
            height_db: env.open_database(HEIGHT_DB),
            head_db: env.open_database(HEAD_DB),
        }
    }

    pub fn get_chain_info(&self, hash: &Blake2bHash, include_body: bool, txn_option: Option<&Transaction>) -> Option<ChainInfo> {
        let mut info = match txn_option {
            Some(txn) => txn.get(&self.chain_db, hash),
            None => ReadTransaction::new(self.env).get(&self.chain_db, hash),
        }?;
        if !include_body {
            info.head.body = None;
        }
        Some(info)
    }

    pub fn get_chain_info_at(&self, height: u32, include_body: bool, txn_option: Option<&Transaction>) -> Option<ChainInfo> {
        let hash: Blake2bHash = match txn_option {
            Some(txn) => txn.get(&self.height_db, &height),
            None => ReadTransaction::new(self.env).get(&self.height_db, &height),
        }?;
        self.get_chain_info(&hash, include_body, txn_option)
    }

    pub fn put_chain_info(&self, txn: &mut WriteTransaction, hash: &Blake2bHash, chain_info: &ChainInfo, include_body: bool) {
        let to_store = if include_body {
            chain_info.clone()
        } else {
            let mut stripped = chain_info.clone();
            stripped.head.body = None;
            stripped
        };
        let height = to_store.head.header.height;
        txn.put(&self.chain_db, hash, &to_store);
        txn.put(&self.height_db, &height, hash);
    }

    pub fn get_head(&self, txn_option: Option<&Transaction>) -> Option<Blake2bHash> {
        match txn_option {
            Some(txn) => txn.get(&self.head_db, &HEAD_KEY),
            None => ReadTransaction::new(self.env).get(&self.head_db, &HEAD_KEY),
        }
    }

    pub fn set_head(&self, txn: &mut WriteTransaction, hash: &Blake2bHash) {
        txn.put(&self.head_db, &HEAD_KEY, hash);
    }

    /// Drop every chain entry, the height index and the head pointer.
    /// Used by the Chain Suffix Applier when a newly adopted proof's
    /// prefix head is not part of the dense chain we already hold
    /// (spec.md §4.2 step 1).
    pub fn truncate(&self, txn: &mut WriteTransaction) {
        txn.truncate(&self.chain_db);
        txn.truncate(&self.height_db);
        txn.truncate(&self.head_db);
    }

    pub fn get_block(&self, hash: &Blake2bHash, include_body: bool, txn_option: Option<&Transaction>) -> Option<Block> {
        self.get_chain_info(hash, include_body, txn_option).map(|info| info.head)
    }

    pub fn get_block_at(&self, height: u32) -> Option<Block> {
        self.get_chain_info_at(height, true, None).map(|info| info.head)
    }

    pub fn get_blocks_backward(&self, start_hash: &Blake2bHash, count: u32, include_body: bool, txn_option: Option<&Transaction>) -> Vec<Block> {
        let mut blocks = Vec::with_capacity(count as usize);
        let mut hash = start_hash.clone();
        for _ in 0..count {
            match self.get_chain_info(&hash, include_body, txn_option) {
                Some(info) => {
                    hash = info.head.header.prev_hash.clone();
                    blocks.push(info.head);
                }
                None => break,
            }
        }
        blocks
    }

    pub fn get_blocks_forward(&self, start_hash: &Blake2bHash, count: u32, include_body: bool, txn_option: Option<&Transaction>) -> Vec<Block> {
        let mut blocks = Vec::with_capacity(count as usize);
        let mut hash = start_hash.clone();
        for _ in 0..count {
            match self.get_chain_info(&hash, include_body, txn_option) {
                Some(info) => match info.main_chain_successor {
                    Some(successor) => {
                        blocks.push(info.head);
                        hash = successor;
                    }
                    None => {
                        blocks.push(info.head);
                        break;
                    }
                },
                None => break,
            }
        }
        blocks
    }

    pub fn get_blocks(&self, start_hash: &Blake2bHash, count: u32, include_body: bool, direction: Direction, txn_option: Option<&Transaction>) -> Vec<Block> {
        match direction {
            Direction::Forward => self.get_blocks_forward(start_hash, count, include_body, txn_option),
            Direction::Backward => self.get_blocks_backward(start_hash, count, include_body, txn_option),
        }
    }
}
