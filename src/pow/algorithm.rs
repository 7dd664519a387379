//! ethashb3 memory-hard generator
//!
//! The classic ethash construction (Sergio Demian Lerner's RandMemoHash for
//! the cache, 256-parent FNV mixing for dataset items, the 64-access
//! hashimoto loop) with BLAKE3 in place of Keccak: the 256-bit hash is
//! plain BLAKE3, the 512-bit one is BLAKE3's extendable output.
//!
//! Buffers are slices of `u32` words holding little-endian interpretations of
//! the underlying bytes, so the numeric content is identical on every host.

use std::time::Instant;

use rayon::prelude::*;
use tracing::info;

/// Data structure version, baked into dump file names.
pub const ALGORITHM_REVISION: u32 = 23;

/// First epoch without precomputed growth (epochs beyond are still valid).
pub const MAX_EPOCH: u64 = 2048;

const DATASET_INIT_BYTES: u64 = 1 << 30; // Bytes in dataset at genesis
const DATASET_GROWTH_BYTES: u64 = 1 << 23; // Dataset growth per epoch
const CACHE_INIT_BYTES: u64 = 1 << 24; // Bytes in cache at genesis
const CACHE_GROWTH_BYTES: u64 = 1 << 17; // Cache growth per epoch
const MIX_BYTES: u64 = 128; // Width of mix
const HASH_BYTES: u64 = 64; // Hash length in bytes
const HASH_WORDS: usize = 16; // Number of 32 bit ints in a hash
const MIX_WORDS: usize = 32;
const DATASET_PARENTS: u32 = 256; // Number of parents of each dataset element
const CACHE_ROUNDS: usize = 3; // Number of rounds in cache production
const LOOP_ACCESSES: u32 = 64; // Number of accesses in hashimoto loop

/// Cache size used by test-mode engines.
pub const TEST_CACHE_BYTES: u64 = 1024;

/// Dataset size used by test-mode engines.
pub const TEST_DATASET_BYTES: u64 = 32 * 1024;

/// Verification cache size in bytes for `epoch`: the largest multiple of 64
/// below the linear growth line whose row count is prime.
pub fn cache_size(epoch: u64) -> u64 {
    let mut size = CACHE_INIT_BYTES + CACHE_GROWTH_BYTES * epoch - HASH_BYTES;
    while !is_prime(size / HASH_BYTES) {
        size -= 2 * HASH_BYTES;
    }
    size
}

/// Mining dataset size in bytes for `epoch`, sized like the cache but in
/// 128-byte mix rows.
pub fn dataset_size(epoch: u64) -> u64 {
    let mut size = DATASET_INIT_BYTES + DATASET_GROWTH_BYTES * epoch - MIX_BYTES;
    while !is_prime(size / MIX_BYTES) {
        size -= 2 * MIX_BYTES;
    }
    size
}

fn is_prime(n: u64) -> bool {
    if n < 4 {
        return n >= 2;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }
    let mut i = 5u64;
    while i * i <= n {
        if n % i == 0 || n % (i + 2) == 0 {
            return false;
        }
        i += 6;
    }
    true
}

#[inline]
fn hash512(data: &[u8]) -> [u8; 64] {
    let mut out = [0u8; 64];
    let mut hasher = blake3::Hasher::new();
    hasher.update(data);
    hasher.finalize_xof().fill(&mut out);
    out
}

#[inline]
fn fnv(a: u32, b: u32) -> u32 {
    a.wrapping_mul(0x0100_0193) ^ b
}

#[inline]
fn fnv_hash(mix: &mut [u32], data: &[u32]) {
    for (m, d) in mix.iter_mut().zip(data) {
        *m = fnv(*m, *d);
    }
}

#[inline]
fn row_bytes(words: &[u32]) -> [u8; 64] {
    let mut out = [0u8; 64];
    for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    out
}

#[inline]
fn row_words(bytes: &[u8; 64]) -> [u32; HASH_WORDS] {
    let mut out = [0u32; HASH_WORDS];
    for (word, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    out
}

#[inline]
fn read_row(words: &[u32], row: usize) -> [u8; 64] {
    row_bytes(&words[row * HASH_WORDS..(row + 1) * HASH_WORDS])
}

/// Fill `dest` with the verification cache for an epoch.
///
/// Sequentially hashes the seed into every 64-byte row, then runs
/// `CACHE_ROUNDS` passes of RandMemoHash over the rows.
pub fn generate_cache(dest: &mut [u32], epoch: u64, epoch_length: u64, seed: &[u8; 32]) {
    let start = Instant::now();
    let rows = dest.len() / HASH_WORDS;
    if rows == 0 {
        return;
    }
    dest[..HASH_WORDS].copy_from_slice(&row_words(&hash512(seed)));
    for r in 1..rows {
        let prev = read_row(dest, r - 1);
        dest[r * HASH_WORDS..(r + 1) * HASH_WORDS].copy_from_slice(&row_words(&hash512(&prev)));
    }

    for _ in 0..CACHE_ROUNDS {
        for r in 0..rows {
            let src = read_row(dest, (r + rows - 1) % rows);
            let xor = read_row(dest, dest[r * HASH_WORDS] as usize % rows);
            let mut temp = [0u8; 64];
            for (t, (a, b)) in temp.iter_mut().zip(src.iter().zip(xor.iter())) {
                *t = a ^ b;
            }
            dest[r * HASH_WORDS..(r + 1) * HASH_WORDS].copy_from_slice(&row_words(&hash512(&temp)));
        }
    }

    info!(
        epoch,
        epoch_length,
        rows,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "[ETHASH] Generated verification cache"
    );
}

/// Compute one 64-byte dataset item from the cache.
pub fn generate_dataset_item(cache: &[u32], index: u32) -> [u32; HASH_WORDS] {
    let rows = (cache.len() / HASH_WORDS) as u32;
    let base = ((index % rows) as usize) * HASH_WORDS;

    let mut seed = [0u32; HASH_WORDS];
    seed.copy_from_slice(&cache[base..base + HASH_WORDS]);
    seed[0] ^= index;
    let mut mix = row_words(&hash512(&row_bytes(&seed)));

    for i in 0..DATASET_PARENTS {
        let parent = (fnv(index ^ i, mix[(i as usize) % HASH_WORDS]) % rows) as usize;
        fnv_hash(&mut mix, &cache[parent * HASH_WORDS..(parent + 1) * HASH_WORDS]);
    }
    row_words(&hash512(&row_bytes(&mix)))
}

/// Fill `dest` with the mining dataset derived from `cache`, spreading the
/// items over the rayon pool.
pub fn generate_dataset(dest: &mut [u32], epoch: u64, epoch_length: u64, cache: &[u32]) {
    let start = Instant::now();
    if cache.len() < HASH_WORDS {
        return;
    }
    dest.par_chunks_mut(HASH_WORDS)
        .enumerate()
        .for_each(|(index, item)| {
            let words = generate_dataset_item(cache, index as u32);
            item.copy_from_slice(&words[..item.len()]);
        });

    info!(
        epoch,
        epoch_length,
        items = dest.len() / HASH_WORDS,
        threads = rayon::current_num_threads(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "[ETHASH] Generated mining dataset"
    );
}

/// Core hashimoto loop over an abstract dataset lookup. Returns
/// `(mix_digest, result)`.
fn hashimoto<F>(seal_hash: &[u8; 32], nonce: u64, size: u64, lookup: F) -> ([u8; 32], [u8; 32])
where
    F: Fn(u32) -> [u32; HASH_WORDS],
{
    let rows = ((size / MIX_BYTES) as u32).max(1);

    let mut input = [0u8; 40];
    input[..32].copy_from_slice(seal_hash);
    input[32..].copy_from_slice(&nonce.to_le_bytes());
    let seed = hash512(&input);
    let seed_head = u32::from_le_bytes([seed[0], seed[1], seed[2], seed[3]]);

    let seed_words = row_words(&seed);
    let mut mix = [0u32; MIX_WORDS];
    for (i, word) in mix.iter_mut().enumerate() {
        *word = seed_words[i % HASH_WORDS];
    }

    let mut temp = [0u32; MIX_WORDS];
    for i in 0..LOOP_ACCESSES {
        let parent = fnv(i ^ seed_head, mix[i as usize % MIX_WORDS]) % rows;
        temp[..HASH_WORDS].copy_from_slice(&lookup(2 * parent));
        temp[HASH_WORDS..].copy_from_slice(&lookup(2 * parent + 1));
        fnv_hash(&mut mix, &temp);
    }

    let mut digest = [0u8; 32];
    for (i, chunk) in mix.chunks_exact(4).enumerate() {
        let folded = fnv(fnv(fnv(chunk[0], chunk[1]), chunk[2]), chunk[3]);
        digest[i * 4..i * 4 + 4].copy_from_slice(&folded.to_le_bytes());
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed);
    hasher.update(&digest);
    (digest, *hasher.finalize().as_bytes())
}

/// Hashimoto over a verification cache, recomputing the dataset items it
/// touches. `dataset_size` is the full dataset size in bytes.
pub fn hashimoto_light(
    dataset_size: u64,
    cache: &[u32],
    seal_hash: &[u8; 32],
    nonce: u64,
) -> ([u8; 32], [u8; 32]) {
    hashimoto(seal_hash, nonce, dataset_size, |index| {
        generate_dataset_item(cache, index)
    })
}

/// Hashimoto over a fully generated dataset.
pub fn hashimoto_full(dataset: &[u32], seal_hash: &[u8; 32], nonce: u64) -> ([u8; 32], [u8; 32]) {
    let size = dataset.len() as u64 * 4;
    hashimoto(seal_hash, nonce, size, |index| {
        let offset = index as usize * HASH_WORDS;
        let mut item = [0u32; HASH_WORDS];
        item.copy_from_slice(&dataset[offset..offset + HASH_WORDS]);
        item
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::epoch::seed_hash;

    fn test_cache(epoch: u64) -> Vec<u32> {
        let mut cache = vec![0u32; (TEST_CACHE_BYTES / 4) as usize];
        generate_cache(&mut cache, epoch, 30_000, &seed_hash(epoch, 30_000));
        cache
    }

    #[test]
    fn test_sizes_are_aligned_and_monotonic() {
        let mut last_cache = 0;
        let mut last_dataset = 0;
        for epoch in [0u64, 1, 2, 10, 100, 500] {
            let c = cache_size(epoch);
            let d = dataset_size(epoch);
            assert_eq!(c % HASH_BYTES, 0);
            assert_eq!(d % MIX_BYTES, 0);
            assert!(is_prime(c / HASH_BYTES));
            assert!(is_prime(d / MIX_BYTES));
            assert!(c >= last_cache && d >= last_dataset);
            last_cache = c;
            last_dataset = d;
        }
        assert!(dataset_size(0) > 50 * cache_size(0));
    }

    #[test]
    fn test_genesis_sizes() {
        assert_eq!(cache_size(0), 16_776_896);
        assert_eq!(dataset_size(0), 1_073_739_904);
    }

    #[test]
    fn test_is_prime() {
        let primes: Vec<u64> = (0..30).filter(|n| is_prime(*n)).collect();
        assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
        assert!(!is_prime(25));
        assert!(is_prime(262_139));
    }

    #[test]
    fn test_cache_is_deterministic() {
        let a = test_cache(3);
        let b = test_cache(3);
        assert_eq!(a, b);
        assert_ne!(a, test_cache(4));
        assert!(a.iter().any(|w| *w != 0));
    }

    #[test]
    fn test_dataset_is_deterministic() {
        let cache = test_cache(0);
        let mut a = vec![0u32; (TEST_DATASET_BYTES / 4) as usize];
        let mut b = vec![0u32; (TEST_DATASET_BYTES / 4) as usize];
        generate_dataset(&mut a, 0, 30_000, &cache);
        generate_dataset(&mut b, 0, 30_000, &cache);
        assert_eq!(a, b);
        assert_eq!(&a[..HASH_WORDS], &generate_dataset_item(&cache, 0)[..]);
        assert_eq!(&a[5 * HASH_WORDS..6 * HASH_WORDS], &generate_dataset_item(&cache, 5)[..]);
    }

    #[test]
    fn test_hashimoto_light_matches_full() {
        let cache = test_cache(0);
        let mut dataset = vec![0u32; (TEST_DATASET_BYTES / 4) as usize];
        generate_dataset(&mut dataset, 0, 30_000, &cache);

        let hash = [0x42u8; 32];
        for nonce in [0u64, 1, 0xdead_beef, u64::MAX] {
            let light = hashimoto_light(TEST_DATASET_BYTES, &cache, &hash, nonce);
            let full = hashimoto_full(&dataset, &hash, nonce);
            assert_eq!(light, full, "nonce {}", nonce);
        }
        assert_ne!(
            hashimoto_full(&dataset, &hash, 1),
            hashimoto_full(&dataset, &hash, 2)
        );
    }
}
