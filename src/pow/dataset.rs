//! Mining dataset entity

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use once_cell::sync::OnceCell;
use tracing::{debug, error, trace};

use crate::errors::StoreError;
use crate::pow::algorithm::{
    cache_size, dataset_size, generate_cache, generate_dataset, hashimoto_full, TEST_CACHE_BYTES,
    TEST_DATASET_BYTES,
};
use crate::pow::files::{collect_stale_dumps, dump_path, DumpKind};
use crate::pow::item::{alloc_words, EpochItem, GenerateOptions, Words};
use crate::pow::store::{create_dump, open_dump};

/// Full ethash dataset for one epoch, derived from a throwaway cache.
#[derive(Debug)]
pub struct Dataset {
    epoch: u64,
    epoch_length: u64,
    words: OnceCell<Words>,
    /// Set once generation fully completed; lets callers poll without blocking
    done: AtomicBool,
    /// A background job owns generation of this dataset
    background: AtomicBool,
    fills: AtomicUsize,
}

impl Dataset {
    pub fn words(&self) -> Option<&[u32]> {
        self.words.get().map(|w| &**w)
    }

    /// Non-blocking readiness check.
    pub fn is_ready(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Claim background generation. Only the first caller gets `true`, until
    /// a failed job hands the claim back with [`Dataset::end_background`].
    pub(crate) fn begin_background(&self) -> bool {
        !self.background.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn end_background(&self) {
        self.background.store(false, Ordering::Release);
    }

    pub fn is_mapped(&self) -> bool {
        self.words.get().map_or(false, Words::is_mapped)
    }

    pub fn fill_count(&self) -> usize {
        self.fills.load(Ordering::SeqCst)
    }

    /// Hashimoto over the full dataset; `None` until it is ready.
    pub fn compute(&self, seal_hash: &[u8; 32], nonce: u64) -> Option<([u8; 32], [u8; 32])> {
        if !self.is_ready() {
            return None;
        }
        self.words()
            .map(|dataset| hashimoto_full(dataset, seal_hash, nonce))
    }

    fn sizes(&self, test: bool) -> (u64, u64) {
        if test {
            (TEST_CACHE_BYTES, TEST_DATASET_BYTES)
        } else {
            (cache_size(self.epoch), dataset_size(self.epoch))
        }
    }

    fn seed_cache(&self, size: u64, seed: &[u8; 32]) -> Result<Vec<u32>, StoreError> {
        let mut cache = alloc_words((size / 4) as usize)?;
        generate_cache(&mut cache, self.epoch, self.epoch_length, seed);
        Ok(cache)
    }

    fn fill(&self, dest: &mut [u32], cache: &[u32]) {
        self.fills.fetch_add(1, Ordering::SeqCst);
        generate_dataset(dest, self.epoch, self.epoch_length, cache);
    }

    fn fill_in_memory(&self, size: u64, cache: &[u32]) -> Result<Words, StoreError> {
        let mut buf = alloc_words((size / 4) as usize)?;
        self.fill(&mut buf, cache);
        Ok(Words::Heap(buf))
    }

    fn build(&self, opts: &GenerateOptions) -> Result<Words, StoreError> {
        let (csize, dsize) = self.sizes(opts.test);
        let seed = opts.schedule.seed_hash(self.epoch, self.epoch_length);

        let Some(dir) = opts.disk_dir() else {
            let cache = self.seed_cache(csize, &seed)?;
            return self.fill_in_memory(dsize, &cache);
        };
        let path = dump_path(dir, Self::KIND, self.epoch, &seed);

        match open_dump(&path, Some((dsize / 4) as usize), opts.lock_mmap) {
            Ok(dump) => {
                debug!(epoch = self.epoch, path = %path.display(), "[ETHASH] Loaded dataset from disk");
                return Ok(Words::Mapped(dump));
            }
            Err(err) => {
                debug!(epoch = self.epoch, error = %err, "[ETHASH] No usable dataset on disk")
            }
        }

        let cache = self.seed_cache(csize, &seed)?;
        let words = match create_dump(&path, dsize, opts.lock_mmap, |buf| self.fill(buf, &cache)) {
            Ok(dump) => Words::Mapped(dump),
            Err(err) => {
                error!(epoch = self.epoch, error = %err, "[ETHASH] Failed to generate mapped dataset");
                self.fill_in_memory(dsize, &cache)?
            }
        };
        collect_stale_dumps(dir, Self::KIND, self.epoch, opts.disk_retention);
        Ok(words)
    }
}

impl EpochItem for Dataset {
    const KIND: DumpKind = DumpKind::Dataset;

    fn new(epoch: u64, epoch_length: u64) -> Self {
        Dataset {
            epoch,
            epoch_length,
            words: OnceCell::new(),
            done: AtomicBool::new(false),
            background: AtomicBool::new(false),
            fills: AtomicUsize::new(0),
        }
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }

    fn epoch_length(&self) -> u64 {
        self.epoch_length
    }

    fn generate(&self, opts: &GenerateOptions) -> Result<(), StoreError> {
        self.words.get_or_try_init(|| self.build(opts))?;
        self.done.store(true, Ordering::Release);
        Ok(())
    }

    fn release(&mut self) {
        self.done.store(false, Ordering::Release);
        if let Some(words) = self.words.take() {
            trace!(epoch = self.epoch, mapped = words.is_mapped(), "[ETHASH] Released dataset");
        }
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::cache::Cache;
    use crate::pow::epoch::EpochSchedule;
    use tempfile::TempDir;

    #[test]
    fn test_ready_flag() {
        let dataset = Dataset::new(0, 30_000);
        assert!(!dataset.is_ready());
        assert!(dataset.compute(&[1u8; 32], 7).is_none());

        dataset.generate(&GenerateOptions::in_memory(true)).unwrap();
        assert!(dataset.is_ready());
        assert_eq!(dataset.words().unwrap().len(), (TEST_DATASET_BYTES / 4) as usize);
        assert_eq!(dataset.fill_count(), 1);
    }

    #[test]
    fn test_background_claimed_once() {
        let dataset = Dataset::new(0, 30_000);
        assert!(dataset.begin_background());
        assert!(!dataset.begin_background());
        dataset.end_background();
        assert!(dataset.begin_background());
    }

    #[test]
    fn test_full_matches_light() {
        let opts = GenerateOptions::in_memory(true);
        let dataset = Dataset::new(1, 30_000);
        dataset.generate(&opts).unwrap();
        let cache = Cache::new(1, 30_000);
        cache.generate(&opts).unwrap();

        let hash = [9u8; 32];
        for nonce in [0u64, 42, 1 << 40] {
            assert_eq!(
                dataset.compute(&hash, nonce),
                cache.compute(TEST_DATASET_BYTES, &hash, nonce)
            );
        }
    }

    #[test]
    fn test_disk_round_trip_matches_memory() {
        let dir = TempDir::new().unwrap();
        let opts = GenerateOptions {
            dir: Some(dir.path().to_path_buf()),
            disk_retention: 2,
            lock_mmap: false,
            test: true,
            schedule: EpochSchedule::MAINNET,
        };

        let mem = Dataset::new(2, 30_000);
        mem.generate(&GenerateOptions::in_memory(true)).unwrap();

        let written = Dataset::new(2, 30_000);
        written.generate(&opts).unwrap();
        assert!(written.is_mapped());
        assert_eq!(written.words(), mem.words());
        drop(written);

        let loaded = Dataset::new(2, 30_000);
        loaded.generate(&opts).unwrap();
        assert!(loaded.is_ready());
        assert_eq!(loaded.fill_count(), 0);
        assert_eq!(loaded.words(), mem.words());
    }
}
