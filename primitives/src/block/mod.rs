mod body;
mod header;
mod interlink;
mod target;

pub use body::BlockBody;
pub use header::BlockHeader;
pub use interlink::Interlink;
pub use target::{hash_to_target, is_valid_target, real_difficulty, Difficulty, Target, TargetCompact};

use std::io;

use beserial::{Deserialize, Serialize};
use nimiq_hash::{Blake2bHash, Hash, SerializeContent};

use crate::networks::NetworkId;
use crate::transaction::TransactionError;

/// How far into the future (in seconds) a block's timestamp may lie to
/// still be accepted - guards against a peer backdating difficulty.
pub const ALLOWED_TIME_DRIFT: u32 = 600;

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub interlink: Interlink,
    pub body: Option<BlockBody>,
}

impl SerializeContent for Block {
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        Ok(Serialize::serialize(self, writer)?)
    }
}

impl Hash for Block {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockError {
    InvalidProofOfWork,
    FromTheFuture,
    ZeroHeight,
    InvalidInterlinkHash,
    InvalidBodyHash,
    DuplicateTransaction,
    TransactionsNotOrdered,
    ExpiredTransaction,
    InvalidTransaction(TransactionError),
    DuplicatePrunedAccount,
    PrunedAccountsNotOrdered,
    InvalidPrunedAccount,
}

impl std::fmt::Display for BlockError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for BlockError {}

impl Block {
    pub fn hash(&self) -> Blake2bHash {
        self.header.hash()
    }

    pub fn prev_hash(&self) -> &Blake2bHash {
        &self.header.prev_hash
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn n_bits(&self) -> TargetCompact {
        self.header.n_bits
    }

    pub fn difficulty(&self) -> Difficulty {
        Target::from(self.header.n_bits).difficulty()
    }

    pub fn is_full(&self) -> bool {
        self.body.is_some()
    }

    pub fn is_immediate_successor_of(&self, other: &Block) -> bool {
        self.header.is_immediate_successor_of(&other.header)
    }

    /// Intrinsic invariants a block must satisfy independent of where it
    /// sits in any particular chain: proof of work, timestamp sanity,
    /// interlink/body hash consistency and (if a body is present) the
    /// transaction/pruned-account invariants `BlockBody::verify` checks.
    pub fn verify(&self, now: u32, network_id: NetworkId) -> Result<(), BlockError> {
        if !self.header.verify_proof_of_work() {
            return Err(BlockError::InvalidProofOfWork);
        }
        if self.header.height == 0 {
            return Err(BlockError::ZeroHeight);
        }
        if self.header.timestamp > now + ALLOWED_TIME_DRIFT {
            return Err(BlockError::FromTheFuture);
        }
        if self.header.interlink_hash != self.interlink.hash() {
            return Err(BlockError::InvalidInterlinkHash);
        }
        if let Some(body) = &self.body {
            if self.header.body_hash != body.hash() {
                return Err(BlockError::InvalidBodyHash);
            }
            body.verify(self.header.height, network_id)?;
        }
        Ok(())
    }

    /// The interlink the immediate successor of this block should carry,
    /// given that successor's difficulty target. See `Interlink::next`.
    pub fn get_next_interlink(&self, next_target: &Target) -> Interlink {
        let hash = self.hash();
        let own_depth = hash_to_target(&hash).get_depth();
        self.interlink.next(&hash, own_depth, next_target)
    }
}

