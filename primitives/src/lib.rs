//! Block, account and transaction primitives, plus the chain-wide policy
//! constants (`nimiq_primitives::policy`), shared by every other crate in
//! the workspace that needs to agree on "what a block is" without pulling
//! in storage (`nimiq-database`) or consensus (`nimiq-blockchain`,
//! `nimiq-consensus`) machinery.

pub mod account;
pub mod block;
pub mod networks;
pub mod policy;
pub mod transaction;
