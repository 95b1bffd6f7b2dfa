//! The partial light chain synchronizer: adopts a NIPoPoW-style chain
//! proof, fills in the accounts state it implies, and walks the dense
//! suffix backward block by block until enough history has been verified
//! to hand a caught-up chain back to the caller (spec.md §2-§5).
//!
//! This crate owns its own `ChainStore`/`Accounts` handles against a
//! shared `Environment` - it never reaches into a running `Blockchain`
//! instance directly. The two are wired together only once a sync
//! reaches `COMPLETE` and the caller commits the result.

mod proof_evaluator;
mod sync;

pub use crate::proof_evaluator::ProofEvaluator;
pub use crate::sync::{ChunkPushResult, PartialLightChainSynchronizer, PushResult, SyncEvent, SyncState};
