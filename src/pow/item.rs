//! Shared plumbing for the two epoch-scoped entities (cache and dataset)

use std::ops::Deref;
use std::path::PathBuf;

use crate::errors::StoreError;
use crate::pow::epoch::EpochSchedule;
use crate::pow::files::DumpKind;
use crate::pow::store::MappedDump;

/// Backing storage of a generated cache or dataset.
#[derive(Debug)]
pub(crate) enum Words {
    Heap(Vec<u32>),
    Mapped(MappedDump),
}

impl Deref for Words {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        match self {
            Words::Heap(words) => words,
            Words::Mapped(dump) => dump.words(),
        }
    }
}

impl Words {
    pub(crate) fn is_mapped(&self) -> bool {
        matches!(self, Words::Mapped(_))
    }
}

/// Where and how an entity generates itself.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Dump directory; `None` keeps everything in memory
    pub dir: Option<PathBuf>,

    /// Epochs of dumps kept behind the current one (0 disables disk)
    pub disk_retention: u64,

    /// Pin mapped dumps in RAM
    pub lock_mmap: bool,

    /// Use the tiny test sizes
    pub test: bool,

    /// Schedule the seed is derived under
    pub schedule: EpochSchedule,
}

impl GenerateOptions {
    /// In-memory generation only.
    pub fn in_memory(test: bool) -> Self {
        GenerateOptions {
            test,
            ..Default::default()
        }
    }

    /// Directory to use for dumps, if disk use is enabled at all.
    pub(crate) fn disk_dir(&self) -> Option<&PathBuf> {
        match &self.dir {
            Some(dir) if self.disk_retention > 0 && !dir.as_os_str().is_empty() => Some(dir),
            _ => None,
        }
    }
}

/// Capability shared by caches and datasets: a lazily generated,
/// epoch-scoped word buffer the LRU can construct and hand out.
pub trait EpochItem: Send + Sync + Sized + 'static {
    /// Dump file family.
    const KIND: DumpKind;

    /// Empty, not yet generated entity.
    fn new(epoch: u64, epoch_length: u64) -> Self;

    fn epoch(&self) -> u64;

    fn epoch_length(&self) -> u64;

    /// Generate the content if nobody did yet; concurrent callers block until
    /// the first one finishes.
    fn generate(&self, opts: &GenerateOptions) -> Result<(), StoreError>;

    /// Drop the content, unmapping any backing dump.
    fn release(&mut self);
}

/// Zeroed heap buffer of `words` words, failing instead of aborting when the
/// allocation is impossible.
pub(crate) fn alloc_words(words: usize) -> Result<Vec<u32>, StoreError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(words)
        .map_err(|_| StoreError::OutOfMemory { words })?;
    buf.resize(words, 0);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_dir_requires_retention() {
        let mut opts = GenerateOptions {
            dir: Some(PathBuf::from("/tmp/ethashb3")),
            disk_retention: 0,
            ..Default::default()
        };
        assert!(opts.disk_dir().is_none());
        opts.disk_retention = 2;
        assert_eq!(opts.disk_dir(), Some(&PathBuf::from("/tmp/ethashb3")));
        opts.dir = Some(PathBuf::new());
        assert!(opts.disk_dir().is_none());
    }

    #[test]
    fn test_alloc_words() {
        let buf = alloc_words(256).unwrap();
        assert_eq!(buf.len(), 256);
        assert!(buf.iter().all(|w| *w == 0));
        assert!(matches!(
            alloc_words(usize::MAX),
            Err(StoreError::OutOfMemory { .. })
        ));
    }
}
