use std::collections::BTreeMap;

use nimiq_database::{Database, WriteTransaction};
use nimiq_keys::Address;
use nimiq_primitives::account::Account;

/// One increment of an accounts-tree snapshot transfer: a contiguous,
/// address-ordered run of terminal entries, plus whether this is the last
/// chunk the sender will offer. A real radix-trie sync would also carry
/// the sibling proof nodes needed to verify each chunk against a pinned
/// root; the accounts-tree Merkle implementation itself is out of PLCS's
/// scope, so `PartialAccountsTree` only enforces contiguity here and
/// leaves root verification to `Accounts::hash` once the tree is complete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountsTreeChunk {
    pub accounts: Vec<(Address, Account)>,
    pub is_final: bool,
}

impl AccountsTreeChunk {
    pub fn new(accounts: Vec<(Address, Account)>, is_final: bool) -> Self {
        AccountsTreeChunk { accounts, is_final }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ChunkError {
    /// The chunk's first address sorts before the prefix we're still
    /// missing - it overlaps or precedes data we already have.
    NotAdjacent,
    /// Addresses within the chunk were not in ascending order.
    Unsorted,
    /// A chunk arrived after the tree already reported completion.
    AlreadyComplete,
}

/// Accumulates `AccountsTreeChunk`s offered by a single proof's accounts
/// snapshot (spec.md §4.3 "Accounts Snapshot Sink"). Addresses are tracked
/// by the lexicographically smallest address not yet covered, matching how
/// a real node would describe `getMissingAccountsPrefix` as a hex prefix
/// rather than a full address.
pub struct PartialAccountsTree {
    entries: BTreeMap<Address, Account>,
    next_address: Option<Address>,
    complete: bool,
}

impl PartialAccountsTree {
    pub fn new() -> Self {
        PartialAccountsTree {
            entries: BTreeMap::new(),
            next_address: Some(Address::from([0u8; 20])),
            complete: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The address a producer's next chunk must start at, formatted as a
    /// hex prefix (`None` once the tree is complete - nothing is missing).
    pub fn missing_prefix(&self) -> Option<String> {
        self.next_address.map(|address| address.to_string())
    }

    pub fn push_chunk(&mut self, chunk: AccountsTreeChunk) -> Result<(), ChunkError> {
        if self.complete {
            return Err(ChunkError::AlreadyComplete);
        }

        let expected_start = self.next_address.expect("next_address is Some while incomplete");
        if let Some((first, _)) = chunk.accounts.first() {
            if *first < expected_start {
                return Err(ChunkError::NotAdjacent);
            }
        }

        let mut previous: Option<Address> = None;
        for (address, _) in &chunk.accounts {
            if let Some(prev) = previous {
                if *address <= prev {
                    return Err(ChunkError::Unsorted);
                }
            }
            previous = Some(*address);
        }

        for (address, account) in chunk.accounts {
            self.entries.insert(address, account);
        }

        if chunk.is_final {
            self.complete = true;
            self.next_address = None;
        } else if let Some(last) = previous {
            self.next_address = successor(last);
        }

        Ok(())
    }

    /// Discard this in-progress snapshot. Nothing has touched persistent
    /// storage yet, so this is just dropping `self`; kept as a named method
    /// to mirror the `pushChunk`/`commit`/`abort` lifecycle other sink
    /// stages (e.g. `ReverseBlockApplier`) expose.
    pub fn abort(self) {}

    /// Write every accumulated entry into the accounts store. Only
    /// meaningful once `is_complete()` - callers are expected to check.
    /// Takes `&self` rather than consuming the tree: a completed snapshot
    /// is written into more than one transaction (a durable staging
    /// transaction and a separate verification-only one), and both need
    /// the same entries.
    pub fn commit(&self, db: Database, txn: &mut WriteTransaction) {
        for (address, account) in &self.entries {
            txn.put(&db, address, account);
        }
    }
}

impl Default for PartialAccountsTree {
    fn default() -> Self {
        PartialAccountsTree::new()
    }
}

/// The lexicographically next 20-byte address after `address`, or `None`
/// if `address` is the maximum (0xFF...FF) - there is nothing left to miss.
fn successor(address: Address) -> Option<Address> {
    let mut bytes: [u8; 20] = address.into();
    for byte in bytes.iter_mut().rev() {
        if *byte == 0xFF {
            *byte = 0;
        } else {
            *byte += 1;
            return Some(Address::from(bytes));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last_byte: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = last_byte;
        Address::from(bytes)
    }

    #[test]
    fn it_tracks_the_missing_prefix_across_chunks() {
        let mut tree = PartialAccountsTree::new();
        assert_eq!(tree.missing_prefix(), Some(addr(0).to_string()));

        tree.push_chunk(AccountsTreeChunk::new(
            vec![(addr(1), Account { balance: 10 }), (addr(2), Account { balance: 20 })],
            false,
        ))
        .unwrap();
        assert_eq!(tree.missing_prefix(), Some(addr(3).to_string()));
        assert!(!tree.is_complete());

        tree.push_chunk(AccountsTreeChunk::new(vec![(addr(5), Account { balance: 5 })], true))
            .unwrap();
        assert!(tree.is_complete());
        assert_eq!(tree.missing_prefix(), None);
    }

    #[test]
    fn it_rejects_chunks_that_overlap_already_covered_addresses() {
        let mut tree = PartialAccountsTree::new();
        tree.push_chunk(AccountsTreeChunk::new(vec![(addr(5), Account { balance: 5 })], false))
            .unwrap();

        let result = tree.push_chunk(AccountsTreeChunk::new(vec![(addr(3), Account { balance: 3 })], false));
        assert_eq!(result, Err(ChunkError::NotAdjacent));
    }

    #[test]
    fn it_rejects_unsorted_chunks() {
        let mut tree = PartialAccountsTree::new();
        let result = tree.push_chunk(AccountsTreeChunk::new(
            vec![(addr(5), Account { balance: 5 }), (addr(2), Account { balance: 2 })],
            false,
        ));
        assert_eq!(result, Err(ChunkError::Unsorted));
    }

    #[test]
    fn it_rejects_chunks_once_complete() {
        let mut tree = PartialAccountsTree::new();
        tree.push_chunk(AccountsTreeChunk::new(vec![], true)).unwrap();
        let result = tree.push_chunk(AccountsTreeChunk::new(vec![], false));
        assert_eq!(result, Err(ChunkError::AlreadyComplete));
    }
}
