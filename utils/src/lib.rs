//! Small, independent utilities shared by the higher-level crates. Each
//! lives behind a Cargo feature so a consumer only pays for what it uses,
//! matching how `nimiq-database`/`nimiq-blockchain` scope their own
//! features.

#[cfg(feature = "iterators")]
pub mod iterators;

#[cfg(feature = "observer")]
pub mod observer;

#[cfg(feature = "unique-ptr")]
pub mod unique_ptr;

#[cfg(feature = "time")]
pub mod time;

#[cfg(feature = "mutable-once")]
pub mod mutable_once;
