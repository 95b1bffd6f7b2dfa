//! Persistent storage and consensus-rule enforcement for the full chain:
//! block validation, the main-chain/fork bookkeeping `ChainStore` persists,
//! difficulty retargeting, and the NIPoPoW chain-proof prover consumed by
//! `nimiq-consensus`'s partial light chain synchronizer (spec.md §3, §4.1).

mod blockchain;
mod chain_info;
mod chain_proof;
mod chain_store;
mod transaction_cache;

pub use crate::blockchain::{Blockchain, BlockchainEvent, PushError, PushResult};
pub use crate::chain_info::{ChainInfo, ChainState, SuperBlockCounts};
pub use crate::chain_proof::{lowest_common_ancestor, ChainProof};
pub use crate::chain_store::{ChainStore, Direction};
pub use crate::transaction_cache::TransactionCache;
