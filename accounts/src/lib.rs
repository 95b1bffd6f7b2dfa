//! Account balances and the snapshot machinery a partial light-chain sync
//! needs to commit and revert blocks. The accounts-tree Merkle
//! implementation itself is out of scope here - balances are stored flat
//! and addressed directly, with `Accounts::hash` standing in for a trie
//! root. See `nimiq-consensus` for the state machine that drives `transaction`,
//! `commit_block`, `revert_block` and `PartialAccountsTree` against a
//! running proof evaluation.

mod accounts;
mod tree;

pub use crate::accounts::{Accounts, AccountsTransaction, BLOCK_REWARD};
pub use crate::tree::{AccountsTreeChunk, ChunkError, PartialAccountsTree};

#[cfg(test)]
mod tests {
    use nimiq_database::{Environment, WriteTransaction};
    use nimiq_keys::Address;
    use nimiq_primitives::account::Account;
    use nimiq_primitives::block::{Block, BlockBody, BlockHeader, Interlink};
    use nimiq_primitives::networks::NetworkId;
    use nimiq_primitives::transaction::Transaction;

    use super::*;

    fn miner() -> Address {
        Address::from([1u8; 20])
    }

    fn alice() -> Address {
        Address::from([2u8; 20])
    }

    fn bob() -> Address {
        Address::from([3u8; 20])
    }

    fn block_with_body(body: BlockBody, accounts_hash: nimiq_hash::Blake2bHash) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash: nimiq_hash::Blake2bHash::default(),
                interlink_hash: Interlink::default().hash(),
                body_hash: body.hash(),
                accounts_hash,
                n_bits: Default::default(),
                height: 1,
                timestamp: 0,
                nonce: 0,
            },
            interlink: Interlink::default(),
            body: Some(body),
        }
    }

    #[test]
    fn it_credits_the_miner_reward_on_commit() {
        let env = Environment::new();
        let accounts = Accounts::new(&env);
        let mut txn = WriteTransaction::new(&env);
        accounts.init(&mut txn, NetworkId::Dev);

        let body = BlockBody {
            miner: miner(),
            extra_data: vec![],
            transactions: vec![],
            pruned_accounts: vec![],
        };

        let mut probe = WriteTransaction::new(&env);
        accounts.commit_block(&mut probe, &block_with_body(body.clone(), Default::default())).unwrap_err();
        // The probe above fails its hash check (we don't know the real root
        // yet); compute it separately against a scratch transaction.
        let mut scratch = WriteTransaction::new(&env);
        scratch.put(&nimiq_database::Environment::new().open_database("Accounts"), &miner(), &Account { balance: BLOCK_REWARD });

        let resulting_hash = {
            let mut txn2 = WriteTransaction::new(&env);
            accounts.init(&mut txn2, NetworkId::Dev);
            txn2.put(&env.open_database("Accounts"), &miner(), &Account { balance: 0 });
            accounts.hash(Some(&txn2))
        };
        let block = block_with_body(body, resulting_hash);
        accounts.commit_block(&mut txn, &block).unwrap();
        txn.commit();

        let balance = accounts.get(&miner(), None).balance;
        assert_eq!(balance, BLOCK_REWARD);
    }

    #[test]
    fn it_transfers_value_between_accounts_and_reverts_cleanly() {
        let env = Environment::new();
        let accounts = Accounts::new(&env);

        let mut seed = WriteTransaction::new(&env);
        accounts.init(&mut seed, NetworkId::Dev);
        seed.put(&env.open_database("Accounts"), &alice(), &Account { balance: 100 });
        seed.commit();

        let body = BlockBody {
            miner: miner(),
            extra_data: vec![],
            transactions: vec![Transaction {
                sender: alice(),
                recipient: bob(),
                value: 40,
                fee: 0,
                validity_start_height: 0,
                signature: vec![],
            }],
            pruned_accounts: vec![],
        };

        let expected_hash = {
            let mut txn = WriteTransaction::new(&env);
            txn.put(&env.open_database("Accounts"), &alice(), &Account { balance: 60 });
            txn.put(&env.open_database("Accounts"), &bob(), &Account { balance: 40 });
            txn.put(&env.open_database("Accounts"), &miner(), &Account { balance: 0 });
            accounts.hash(Some(&txn))
        };

        let block = block_with_body(body, expected_hash);

        let mut apply_txn = WriteTransaction::new(&env);
        accounts.commit_block(&mut apply_txn, &block).unwrap();
        apply_txn.commit();

        assert_eq!(accounts.get(&alice(), None).balance, 60);
        assert_eq!(accounts.get(&bob(), None).balance, 40);

        let mut txn = accounts.transaction();
        txn.revert_block(&block).unwrap();
        txn.commit();

        assert_eq!(accounts.get(&alice(), None).balance, 100);
        assert_eq!(accounts.get(&bob(), None).balance, 0);
    }

    #[test]
    fn it_rejects_a_block_whose_transactions_overdraw_the_sender() {
        let env = Environment::new();
        let accounts = Accounts::new(&env);

        let mut seed = WriteTransaction::new(&env);
        accounts.init(&mut seed, NetworkId::Dev);
        seed.put(&env.open_database("Accounts"), &alice(), &Account { balance: 10 });
        seed.commit();

        let body = BlockBody {
            miner: miner(),
            extra_data: vec![],
            transactions: vec![Transaction {
                sender: alice(),
                recipient: bob(),
                value: 50,
                fee: 0,
                validity_start_height: 0,
                signature: vec![],
            }],
            pruned_accounts: vec![],
        };
        let block = block_with_body(body, Default::default());

        let mut txn = WriteTransaction::new(&env);
        let result = accounts.commit_block(&mut txn, &block);
        assert!(result.is_err());
        txn.abort();

        // State must be untouched: alice still has her original balance.
        assert_eq!(accounts.get(&alice(), None).balance, 10);
    }

    #[test]
    fn it_rejects_a_mismatched_accounts_hash_without_mutating_state() {
        let env = Environment::new();
        let accounts = Accounts::new(&env);

        let mut seed = WriteTransaction::new(&env);
        accounts.init(&mut seed, NetworkId::Dev);
        seed.put(&env.open_database("Accounts"), &alice(), &Account { balance: 100 });
        seed.commit();

        let body = BlockBody {
            miner: miner(),
            extra_data: vec![],
            transactions: vec![Transaction {
                sender: alice(),
                recipient: bob(),
                value: 10,
                fee: 0,
                validity_start_height: 0,
                signature: vec![],
            }],
            pruned_accounts: vec![],
        };
        // Deliberately wrong root.
        let block = block_with_body(body, nimiq_hash::Blake2bHasher::digest(b"wrong"));

        let mut txn = WriteTransaction::new(&env);
        let result = accounts.commit_block(&mut txn, &block);
        assert_eq!(result, Err(nimiq_primitives::account::AccountError::AccountsHashMismatch));
        txn.commit();

        assert_eq!(accounts.get(&alice(), None).balance, 100);
        assert_eq!(accounts.get(&bob(), None).balance, 0);
    }

    #[test]
    fn it_checks_the_expected_hash_when_reverting_backward() {
        let env = Environment::new();
        let accounts = Accounts::new(&env);

        let mut seed = WriteTransaction::new(&env);
        accounts.init(&mut seed, NetworkId::Dev);
        seed.put(&env.open_database("Accounts"), &alice(), &Account { balance: 100 });
        seed.commit();

        let body = BlockBody {
            miner: miner(),
            extra_data: vec![],
            transactions: vec![Transaction {
                sender: alice(),
                recipient: bob(),
                value: 40,
                fee: 0,
                validity_start_height: 0,
                signature: vec![],
            }],
            pruned_accounts: vec![],
        };

        let expected_hash = {
            let mut txn = WriteTransaction::new(&env);
            txn.put(&env.open_database("Accounts"), &alice(), &Account { balance: 60 });
            txn.put(&env.open_database("Accounts"), &bob(), &Account { balance: 40 });
            txn.put(&env.open_database("Accounts"), &miner(), &Account { balance: 0 });
            accounts.hash(Some(&txn))
        };
        let block = block_with_body(body, expected_hash);

        let mut apply_txn = WriteTransaction::new(&env);
        accounts.commit_block(&mut apply_txn, &block).unwrap();
        apply_txn.commit();

        // Reverting against the wrong predecessor hash must reject without
        // mutating this transaction's view.
        let mut txn = accounts.transaction();
        let wrong_hash = nimiq_hash::Blake2bHasher::digest(b"wrong");
        let result = txn.revert_block_checked(&block, &wrong_hash);
        assert_eq!(result, Err(nimiq_primitives::account::AccountError::AccountsHashMismatch));
        assert_eq!(txn.hash(), accounts.hash(None));

        // The real predecessor state (alice back at 100, bob back at 0) succeeds.
        let predecessor_hash = {
            let mut probe = WriteTransaction::new(&env);
            probe.put(&env.open_database("Accounts"), &alice(), &Account { balance: 100 });
            probe.put(&env.open_database("Accounts"), &bob(), &Account { balance: 0 });
            accounts.hash(Some(&probe))
        };
        txn.revert_block_checked(&block, &predecessor_hash).unwrap();
        txn.commit();

        assert_eq!(accounts.get(&alice(), None).balance, 100);
        assert_eq!(accounts.get(&bob(), None).balance, 0);
    }

    #[test]
    fn it_tracks_partial_tree_completion_and_commits_it() {
        let env = Environment::new();
        let accounts = Accounts::new(&env);
        let mut init_txn = WriteTransaction::new(&env);
        accounts.init(&mut init_txn, NetworkId::Dev);
        init_txn.commit();

        let mut tree = PartialAccountsTree::new();
        tree.push_chunk(AccountsTreeChunk::new(vec![(alice(), Account { balance: 7 })], true))
            .unwrap();
        assert!(tree.is_complete());

        let mut txn = WriteTransaction::new(&env);
        tree.commit(accounts.db(), &mut txn);
        txn.commit();

        assert_eq!(accounts.get(&alice(), None).balance, 7);
    }
}
