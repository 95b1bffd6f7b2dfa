use std::cmp::Ordering;
use std::io;

use beserial::{Deserialize, Serialize};
use nimiq_hash::{Hash, SerializeContent};
use nimiq_keys::Address;

use crate::networks::NetworkId;
use crate::policy;

/// A value transfer between two basic accounts. PLCS never constructs or
/// signs transactions itself - it only needs enough structure for
/// `BlockBody::verify` and `Accounts::commit_block`/`revert_block` to do
/// their (out-of-scope) jobs, so this skips the vesting/HTLC transaction
/// flavors and real signature cryptography the full node has.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: Address,
    pub recipient: Address,
    pub value: u64,
    pub fee: u64,
    pub validity_start_height: u32,
    #[beserial(len_type(u8))]
    pub signature: Vec<u8>,
}

impl SerializeContent for Transaction {
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        Ok(Serialize::serialize(self, writer)?)
    }
}

impl Hash for Transaction {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionError {
    SenderEqualsRecipient,
    ZeroValue,
}

impl std::fmt::Display for TransactionError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TransactionError::SenderEqualsRecipient => write!(f, "sender equals recipient"),
            TransactionError::ZeroValue => write!(f, "transaction value is zero"),
        }
    }
}

impl std::error::Error for TransactionError {}

impl Transaction {
    pub fn verify(&self, _network_id: NetworkId) -> Result<(), TransactionError> {
        if self.sender == self.recipient {
            return Err(TransactionError::SenderEqualsRecipient);
        }
        if self.value == 0 {
            return Err(TransactionError::ZeroValue);
        }
        Ok(())
    }

    pub fn is_valid_at(&self, block_height: u32) -> bool {
        block_height >= self.validity_start_height
            && block_height < self.validity_start_height + policy::TRANSACTION_VALIDITY_WINDOW
    }

    /// Canonical in-block ordering: by sender, then validity window, then
    /// value/fee as a tie-break so two otherwise-identical transactions
    /// from the same sender still compare `Equal` only when they really
    /// are duplicates.
    pub fn cmp_block_order(&self, other: &Transaction) -> Ordering {
        self.sender
            .cmp(&other.sender)
            .then_with(|| self.validity_start_height.cmp(&other.validity_start_height))
            .then_with(|| self.recipient.cmp(&other.recipient))
            .then_with(|| self.value.cmp(&other.value))
            .then_with(|| self.fee.cmp(&other.fee))
    }

    /// Total amount debited from the sender's balance.
    pub fn total_value(&self) -> u64 {
        self.value + self.fee
    }
}
