//! ethashb3: memory-hard proof-of-work data engine
//!
//! Derives epochs and seeds from block numbers, generates the per-epoch
//! verification caches and mining datasets (optionally persisted as
//! memory-mapped dumps), keeps the live ones in an epoch-keyed LRU and
//! verifies or searches for seals on top of them.

pub mod config;
pub mod engine;
pub mod errors;
pub mod miner;
pub mod pow;

pub use config::{PowConfig, PowMode};
pub use engine::{make_cache, make_dataset, Ethash, SealHeader};
pub use errors::{ConfigError, SealError, StoreError};
pub use miner::Seal;
pub use pow::{calc_epoch, calc_epoch_length, seed_hash, EpochSchedule};
