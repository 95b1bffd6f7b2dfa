//! A sliding window of the last `policy::TRANSACTION_VALIDITY_WINDOW`
//! blocks' transactions, used by `Blockchain::push`/`extend`/`rebranch` to
//! reject a transaction that has already been included - replay
//! protection for the full/light chain `nimiq-consensus` hands control
//! back to once a partial light chain sync completes (spec.md §1
//! Non-goals: "fork-choice after completion", handled by this chain, not
//! by the synchronizer).

use std::collections::{HashSet, VecDeque};

use nimiq_hash::{Blake2bHash, Hash};
use nimiq_keys::Address;
use nimiq_primitives::block::Block;
use nimiq_primitives::policy;

type TxKey = (Address, Address, u64, u64, u32);

fn tx_key(tx: &nimiq_primitives::transaction::Transaction) -> TxKey {
    (tx.sender, tx.recipient, tx.value, tx.fee, tx.validity_start_height)
}

#[derive(Clone, Debug, Default)]
pub struct TransactionCache {
    blocks: VecDeque<(Blake2bHash, Vec<TxKey>)>,
    transactions: HashSet<TxKey>,
}

impl TransactionCache {
    pub fn new() -> Self {
        TransactionCache::default()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn missing_blocks(&self) -> u32 {
        policy::TRANSACTION_VALIDITY_WINDOW.saturating_sub(self.blocks.len() as u32)
    }

    pub fn head_hash(&self) -> Blake2bHash {
        self.blocks.back().expect("cache is empty").0.clone()
    }

    pub fn tail_hash(&self) -> Blake2bHash {
        self.blocks.front().expect("cache is empty").0.clone()
    }

    pub fn contains_any(&self, block: &Block) -> bool {
        match &block.body {
            Some(body) => body.transactions.iter().any(|tx| self.transactions.contains(&tx_key(tx))),
            None => false,
        }
    }

    /// Record `block` as the new most-recent block, evicting the oldest
    /// entry once the window exceeds `TRANSACTION_VALIDITY_WINDOW`.
    pub fn push_block(&mut self, block: &Block) {
        let keys: Vec<TxKey> = match &block.body {
            Some(body) => body.transactions.iter().map(tx_key).collect(),
            None => Vec::new(),
        };
        for key in &keys {
            self.transactions.insert(*key);
        }
        self.blocks.push_back((block.hash(), keys));

        while self.blocks.len() as u32 > policy::TRANSACTION_VALIDITY_WINDOW {
            if let Some((_, evicted_keys)) = self.blocks.pop_front() {
                for key in evicted_keys {
                    self.transactions.remove(&key);
                }
            }
        }
    }

    /// Undo `push_block` for the current head - used while rebranching to
    /// walk the abandoned main chain back to the common ancestor.
    pub fn revert_block(&mut self, block: &Block) {
        match self.blocks.back() {
            Some((hash, _)) if *hash == block.hash() => {
                let (_, keys) = self.blocks.pop_back().expect("checked Some above");
                for key in keys {
                    self.transactions.remove(&key);
                }
            }
            _ => {}
        }
    }

    /// Extend the window backward with a block older than the current
    /// tail, used to refill history lost by `revert_block` once rebranch
    /// settles on a new main chain (spec.md §4.2 is the sync-side analog
    /// of this same backfill need).
    pub fn prepend_block(&mut self, block: &Block) {
        let keys: Vec<TxKey> = match &block.body {
            Some(body) => body.transactions.iter().map(tx_key).collect(),
            None => Vec::new(),
        };
        for key in &keys {
            self.transactions.insert(*key);
        }
        self.blocks.push_front((block.hash(), keys));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimiq_primitives::block::{BlockBody, BlockHeader, Interlink};
    use nimiq_primitives::transaction::Transaction;

    fn addr(b: u8) -> Address {
        Address::from([b; 20])
    }

    fn block_with_tx(height: u32, tx: Option<Transaction>) -> Block {
        let body = BlockBody {
            miner: addr(9),
            extra_data: vec![],
            transactions: tx.into_iter().collect(),
            pruned_accounts: vec![],
        };
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash: Blake2bHash::default(),
                interlink_hash: Interlink::default().hash(),
                body_hash: body.hash(),
                accounts_hash: Blake2bHash::default(),
                n_bits: Default::default(),
                height,
                timestamp: height,
                nonce: 0,
            },
            interlink: Interlink::default(),
            body: Some(body),
        }
    }

    fn tx() -> Transaction {
        Transaction {
            sender: addr(1),
            recipient: addr(2),
            value: 10,
            fee: 0,
            validity_start_height: 0,
            signature: vec![],
        }
    }

    #[test]
    fn it_flags_a_transaction_already_in_the_window() {
        let mut cache = TransactionCache::new();
        cache.push_block(&block_with_tx(1, Some(tx())));
        assert!(cache.contains_any(&block_with_tx(2, Some(tx()))));
    }

    #[test]
    fn revert_undoes_the_most_recent_push() {
        let mut cache = TransactionCache::new();
        let block = block_with_tx(1, Some(tx()));
        cache.push_block(&block);
        cache.revert_block(&block);
        assert!(cache.is_empty());
        assert!(!cache.contains_any(&block_with_tx(2, Some(tx()))));
    }

    #[test]
    fn the_window_evicts_the_oldest_block_once_full() {
        let mut cache = TransactionCache::new();
        for h in 1..=policy::TRANSACTION_VALIDITY_WINDOW {
            cache.push_block(&block_with_tx(h, None));
        }
        assert_eq!(cache.missing_blocks(), 0);
        let oldest_tail = cache.tail_hash();
        cache.push_block(&block_with_tx(policy::TRANSACTION_VALIDITY_WINDOW + 1, None));
        assert_ne!(cache.tail_hash(), oldest_tail);
    }
}
