//! ethashb3 proof-of-work data
//!
//! Everything needed to turn a block number into a verification cache or a
//! mining dataset: epoch/seed arithmetic, the memory-hard generator, the
//! memory-mapped dump store and the epoch-keyed LRU that keeps the live
//! generations around.

pub mod algorithm;
pub mod cache;
pub mod dataset;
pub mod epoch;
pub mod files;
pub mod item;
pub mod lru;
pub mod store;

pub use algorithm::{
    cache_size, dataset_size, generate_cache, generate_dataset, hashimoto_full, hashimoto_light,
    ALGORITHM_REVISION, MAX_EPOCH,
};
pub use cache::Cache;
pub use dataset::Dataset;
pub use epoch::{calc_epoch, calc_epoch_length, seed_hash, EpochSchedule};
pub use item::{EpochItem, GenerateOptions};
pub use lru::EpochLru;

pub type U256 = [u8; 32];

/// Big-endian `a <= b` over the full 256 bits.
#[inline]
pub fn u256_leq(a: &U256, b: &U256) -> bool {
    a <= b
}

/// PoW target for a difficulty: `2^256 / difficulty`.
///
/// Returns `None` when the quotient does not fit in 256 bits (difficulty 0
/// or 1), in which case every result meets the target.
pub fn target_from_difficulty(difficulty: u64) -> Option<U256> {
    if difficulty <= 1 {
        return None;
    }
    let divisor = difficulty as u128;
    // Long division of the 33-byte number 0x01 00..00 by the divisor.
    let mut rem: u128 = 1;
    let mut target = [0u8; 32];
    for byte in target.iter_mut() {
        let cur = rem << 8;
        *byte = (cur / divisor) as u8;
        rem = cur % divisor;
    }
    Some(target)
}

/// Whether a hashimoto result satisfies the difficulty.
#[inline]
pub fn meets_difficulty(result: &U256, difficulty: u64) -> bool {
    match target_from_difficulty(difficulty) {
        Some(target) => u256_leq(result, &target),
        None => true,
    }
}
