//! Verification cache entity

use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::OnceCell;
use tracing::{debug, error, trace};

use crate::errors::StoreError;
use crate::pow::algorithm::{cache_size, generate_cache, hashimoto_light, TEST_CACHE_BYTES};
use crate::pow::files::{collect_stale_dumps, dump_path, DumpKind};
use crate::pow::item::{alloc_words, EpochItem, GenerateOptions, Words};
use crate::pow::store::{create_dump, open_dump};

/// Ethash verification cache for one epoch.
///
/// Created empty; the content is produced by the first `generate` call and
/// shared by every later one.
#[derive(Debug)]
pub struct Cache {
    epoch: u64,
    epoch_length: u64,
    words: OnceCell<Words>,
    fills: AtomicUsize,
}

impl Cache {
    /// Generated content, `None` until `generate` succeeded.
    pub fn words(&self) -> Option<&[u32]> {
        self.words.get().map(|w| &**w)
    }

    pub fn is_generated(&self) -> bool {
        self.words.get().is_some()
    }

    /// Whether the content lives in a memory-mapped dump.
    pub fn is_mapped(&self) -> bool {
        self.words.get().map_or(false, Words::is_mapped)
    }

    /// How many times the generator ran for this instance.
    pub fn fill_count(&self) -> usize {
        self.fills.load(Ordering::SeqCst)
    }

    /// Hashimoto over this cache for a dataset of `dataset_size` bytes.
    pub fn compute(
        &self,
        dataset_size: u64,
        seal_hash: &[u8; 32],
        nonce: u64,
    ) -> Option<([u8; 32], [u8; 32])> {
        self.words()
            .map(|cache| hashimoto_light(dataset_size, cache, seal_hash, nonce))
    }

    fn fill(&self, dest: &mut [u32], seed: &[u8; 32]) {
        self.fills.fetch_add(1, Ordering::SeqCst);
        generate_cache(dest, self.epoch, self.epoch_length, seed);
    }

    fn fill_in_memory(&self, size: u64, seed: &[u8; 32]) -> Result<Words, StoreError> {
        let mut buf = alloc_words((size / 4) as usize)?;
        self.fill(&mut buf, seed);
        Ok(Words::Heap(buf))
    }

    fn build(&self, opts: &GenerateOptions) -> Result<Words, StoreError> {
        let size = if opts.test {
            TEST_CACHE_BYTES
        } else {
            cache_size(self.epoch)
        };
        let seed = opts.schedule.seed_hash(self.epoch, self.epoch_length);

        let Some(dir) = opts.disk_dir() else {
            return self.fill_in_memory(size, &seed);
        };
        let path = dump_path(dir, Self::KIND, self.epoch, &seed);

        match open_dump(&path, Some((size / 4) as usize), opts.lock_mmap) {
            Ok(dump) => {
                debug!(epoch = self.epoch, path = %path.display(), "[ETHASH] Loaded cache from disk");
                return Ok(Words::Mapped(dump));
            }
            Err(err) => {
                debug!(epoch = self.epoch, error = %err, "[ETHASH] No usable cache on disk")
            }
        }

        let words = match create_dump(&path, size, opts.lock_mmap, |buf| self.fill(buf, &seed)) {
            Ok(dump) => Words::Mapped(dump),
            Err(err) => {
                error!(epoch = self.epoch, error = %err, "[ETHASH] Failed to generate mapped cache");
                self.fill_in_memory(size, &seed)?
            }
        };
        collect_stale_dumps(dir, Self::KIND, self.epoch, opts.disk_retention);
        Ok(words)
    }
}

impl EpochItem for Cache {
    const KIND: DumpKind = DumpKind::Cache;

    fn new(epoch: u64, epoch_length: u64) -> Self {
        Cache {
            epoch,
            epoch_length,
            words: OnceCell::new(),
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
        self.words.get_or_try_init(|| self.build(opts)).map(|_| ())
    }

    fn release(&mut self) {
        if let Some(words) = self.words.take() {
            trace!(epoch = self.epoch, mapped = words.is_mapped(), "[ETHASH] Released cache");
        }
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        self.release();
    }
}
