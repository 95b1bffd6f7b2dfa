use std::io;

use beserial::{Deserialize, Serialize};
use nimiq_hash::{Hash, SerializeContent};
use nimiq_keys::Address;

/// A balance-holding account. Nimiq's full node also has vesting and HTLC
/// account types; PLCS only ever reverts/commits balances through
/// `Accounts::revert_block`/`commit_block`, so the richer account kinds -
/// generic account-type validation, also out of PLCS's scope per spec.md §1
/// - are left to `nimiq-accounts` to model however it needs to.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Account {
    pub balance: u64,
}

impl SerializeContent for Account {
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        Ok(Serialize::serialize(self, writer)?)
    }
}

impl Hash for Account {}

impl Account {
    /// An account with a zero balance carries no information worth keeping
    /// in the tree; full nodes prune it and ship it in a block's
    /// `pruned_accounts` instead so light nodes can still revert through it.
    pub fn is_to_be_pruned(&self) -> bool {
        self.balance == 0
    }
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct PrunedAccount {
    pub address: Address,
    pub account: Account,
}

impl SerializeContent for PrunedAccount {
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        Ok(Serialize::serialize(self, writer)?)
    }
}

impl Hash for PrunedAccount {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountError {
    InsufficientFunds,
    InvalidForSender,
    AccountsHashMismatch,
}

impl std::fmt::Display for AccountError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AccountError::InsufficientFunds => write!(f, "insufficient funds"),
            AccountError::InvalidForSender => write!(f, "invalid operation for account"),
            AccountError::AccountsHashMismatch => write!(f, "accounts hash mismatch after apply/revert"),
        }
    }
}

impl std::error::Error for AccountError {}
