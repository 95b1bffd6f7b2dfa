use std::collections::HashMap;
use std::io::Write as _;

use nimiq_database::{Database, Environment, ReadTransaction, Transaction, WriteTransaction};
use nimiq_hash::{Blake2bHash, Blake2bHasher, Hash, SerializeContent};
use nimiq_keys::Address;
use nimiq_primitives::account::{Account, AccountError};
use nimiq_primitives::block::Block;
use nimiq_primitives::networks::NetworkId;

const ACCOUNTS_DB: &str = "Accounts";

/// Reward credited to a block's miner in addition to the fees its
/// transactions carry. A full node would derive this from `policy`; PLCS
/// only needs the constant to stay consistent between `commit_block` and
/// `revert_block` so applying then reverting a block is the identity.
pub const BLOCK_REWARD: u64 = 0;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// The accounts tree. Implementing it as a real Merkle radix trie is out of
/// PLCS's scope (spec.md §1 carves "the accounts-tree Merkle implementation
/// itself" out), so balances live in a flat key-value table and `hash()`
/// commits to their sorted contents directly rather than via trie nodes.
/// `ChainSuffixApplier`/`ReverseBlockApplier` only ever see this through the
/// `commit_block`/`revert_block`/`hash` contract, so the simplification is
/// invisible to them.
pub struct Accounts<'env> {
    env: &'env Environment,
    db: Database,
}

impl<'env> Accounts<'env> {
    pub fn new(env: &'env Environment) -> Self {
        let db = env.open_database(ACCOUNTS_DB);
        Accounts { env, db }
    }

    pub fn init(&self, txn: &mut WriteTransaction, _network_id: NetworkId) {
        txn.truncate(&self.db);
    }

    pub fn get(&self, address: &Address, txn_option: Option<&Transaction>) -> Account {
        match txn_option {
            Some(txn) => txn.get(&self.db, address).unwrap_or_default(),
            None => ReadTransaction::new(self.env).get(&self.db, address).unwrap_or_default(),
        }
    }

    pub fn hash(&self, txn_option: Option<&Transaction>) -> Blake2bHash {
        match txn_option {
            Some(txn) => hash_accounts(&self.db, txn),
            None => hash_accounts(&self.db, &ReadTransaction::new(self.env)),
        }
    }

    pub fn commit_block(&self, txn: &mut WriteTransaction, block: &Block) -> Result<(), AccountError> {
        apply_block(&self.db, txn, block, Direction::Forward, Some(&block.header.accounts_hash))
    }

    pub fn revert_block(&self, txn: &mut WriteTransaction, block: &Block) -> Result<(), AccountError> {
        apply_block(&self.db, txn, block, Direction::Backward, None)
    }

    /// The underlying table handle, needed by callers (`PartialAccountsTree::commit`)
    /// that write entries directly without going through `commit_block`/`revert_block`.
    pub fn db(&self) -> Database {
        self.db
    }

    /// Open a fresh accounts transaction, the substrate the Reverse Block
    /// Applier calls `revert_block` against while walking the dense suffix
    /// backward toward the pre-sync tip (spec.md §4.3).
    pub fn transaction(&self) -> AccountsTransaction<'env> {
        AccountsTransaction {
            db: self.db,
            txn: WriteTransaction::new(self.env),
        }
    }

    /// Stage a completed accounts snapshot (spec.md §4.3 step 1) into a
    /// transaction of its own, independent of any `AccountsTransaction` a
    /// reverse-replay verification walk might separately be mutating. The
    /// caller holds the returned transaction until it is ready to commit
    /// (on sync completion) or abort (on sync abort) - this is the
    /// transaction that actually promotes the snapshot into the canonical
    /// store; an `AccountsTransaction` opened over the same tree is always
    /// discarded, never committed.
    pub fn stage_partial_tree(&self, tree: &crate::tree::PartialAccountsTree) -> WriteTransaction<'env> {
        let mut txn = WriteTransaction::new(self.env);
        tree.commit(self.db, &mut txn);
        txn
    }
}

/// A writable view over an accounts snapshot, opened once on entry to
/// `PROVE_BLOCKS` and replayed backward, one `revert_block` per block, until
/// the suffix is fully covered.
pub struct AccountsTransaction<'env> {
    db: Database,
    txn: WriteTransaction<'env>,
}

impl<'env> AccountsTransaction<'env> {
    pub fn revert_block(&mut self, block: &Block) -> Result<(), AccountError> {
        apply_block(&self.db, &mut self.txn, block, Direction::Backward, None)
    }

    /// Revert `block` and verify the resulting root matches
    /// `expected_accounts_hash` - the accounts hash declared by the block
    /// being prepended in front of it, which must equal the tree's state
    /// immediately before `block` was originally applied. A mismatch
    /// rejects the block without leaving any trace in this transaction.
    pub fn revert_block_checked(&mut self, block: &Block, expected_accounts_hash: &Blake2bHash) -> Result<(), AccountError> {
        apply_block(&self.db, &mut self.txn, block, Direction::Backward, Some(expected_accounts_hash))
    }

    /// Materialize a completed accounts snapshot directly into this
    /// transaction, bypassing `commit_block`/`revert_block` entirely - there
    /// is no block to apply, just entries a snapshot producer already
    /// computed. This transaction is never committed to the canonical
    /// store (see `Accounts::stage_partial_tree`); it only exists so the
    /// reverse block applier's `revert_block_checked` calls have a
    /// snapshot to walk backward against while verifying the suffix.
    pub fn commit_partial_tree(&mut self, tree: &crate::tree::PartialAccountsTree) {
        tree.commit(self.db, &mut self.txn);
    }

    pub fn hash(&self) -> Blake2bHash {
        hash_accounts(&self.db, &self.txn)
    }

    pub fn commit(self) {
        self.txn.commit();
    }

    pub fn abort(self) {
        self.txn.abort();
    }
}

fn hash_accounts(db: &Database, txn: &Transaction) -> Blake2bHash {
    let entries: Vec<(Vec<u8>, Account)> = txn.iter(db);
    let mut hasher = Blake2bHasher::new();
    for (address_bytes, account) in &entries {
        hasher.write_all(address_bytes).expect("hashing cannot fail");
        account.serialize_content(&mut hasher).expect("hashing cannot fail");
    }
    hasher.finish()
}

/// Applies (or, in reverse, un-applies) every transaction in `block`'s body
/// plus the miner reward. Validates that every sender ends up non-negative,
/// and - when `check_hash` is given - that the resulting root matches it,
/// before any of it is written: a failing apply must never mutate `txn`.
/// A forward apply always checks against `block.header.accounts_hash`; a
/// reverse apply only checks when the caller supplies an expected hash (the
/// prepend operation that walks a proof backward does; `Blockchain::rebranch`'s
/// plain `revert_block` does not, since it re-derives the same check via its
/// own `assert_eq!` against the already-known predecessor `ChainInfo`).
fn apply_block(db: &Database, txn: &mut WriteTransaction, block: &Block, direction: Direction, check_hash: Option<&Blake2bHash>) -> Result<(), AccountError> {
    let body = match &block.body {
        Some(body) => body,
        None => return Ok(()), // header-only blocks carry no account deltas
    };

    let sign: i128 = match direction {
        Direction::Forward => 1,
        Direction::Backward => -1,
    };

    let mut deltas: HashMap<Address, i128> = HashMap::new();
    for tx in &body.transactions {
        *deltas.entry(tx.sender).or_insert(0) -= sign * tx.total_value() as i128;
        *deltas.entry(tx.recipient).or_insert(0) += sign * tx.value as i128;
    }
    let fees: u64 = body.transactions.iter().map(|tx| tx.fee).sum();
    *deltas.entry(body.miner).or_insert(0) += sign * (fees + BLOCK_REWARD) as i128;

    let mut resulting: Vec<(Address, Account)> = Vec::with_capacity(deltas.len());
    for (address, delta) in &deltas {
        let current = txn.get::<Address, Account>(db, address).unwrap_or_default();
        let new_balance = current.balance as i128 + delta;
        if new_balance < 0 {
            return Err(AccountError::InsufficientFunds);
        }
        resulting.push((
            *address,
            Account {
                balance: new_balance as u64,
            },
        ));
    }

    if direction == Direction::Forward {
        for pruned in &body.pruned_accounts {
            let balance_after = resulting
                .iter()
                .find(|(address, _)| *address == pruned.address)
                .map(|(_, account)| account.balance)
                .unwrap_or(0);
            if balance_after != 0 {
                return Err(AccountError::InvalidForSender);
            }
        }
    }

    // Stage onto a throwaway snapshot of the touched entries so a failed
    // root check below can restore them - `txn` must come out untouched.
    let previous: Vec<(Address, Account)> = resulting
        .iter()
        .map(|(address, _)| (*address, txn.get::<Address, Account>(db, address).unwrap_or_default()))
        .collect();
    for (address, account) in &resulting {
        txn.put(db, address, account);
    }

    if let Some(expected) = check_hash {
        let actual_hash = hash_accounts(db, txn);
        if actual_hash != *expected {
            for (address, account) in &previous {
                txn.put(db, address, account);
            }
            return Err(AccountError::AccountsHashMismatch);
        }
    }

    Ok(())
}
