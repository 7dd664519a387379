//! Epoch-keyed LRU of live caches/datasets with a look-ahead slot

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::pow::algorithm::MAX_EPOCH;
use crate::pow::item::EpochItem;

fn is_for<T: EpochItem>(item: &T, epoch: u64, epoch_length: u64) -> bool {
    item.epoch() == epoch && item.epoch_length() == epoch_length
}

struct Inner<T> {
    table: LruCache<u64, Arc<T>>,
    /// Entity for the epoch after the most recently requested one
    future: Option<Arc<T>>,
}

/// Keeps the `max` most recently requested epochs alive, plus one entity for
/// the next epoch so it can be generated before it is needed.
///
/// The lock only covers lookups and inserts; generation happens on the
/// returned handles, outside of it.
pub struct EpochLru<T: EpochItem> {
    inner: Mutex<Inner<T>>,
}

impl<T: EpochItem> EpochLru<T> {
    pub fn new(max: usize) -> Self {
        let cap = NonZeroUsize::new(max).unwrap_or(NonZeroUsize::MIN);
        EpochLru {
            inner: Mutex::new(Inner {
                table: LruCache::new(cap),
                future: None,
            }),
        }
    }

    /// Entity for `epoch`, and a freshly created future entity when the
    /// look-ahead target changed.
    pub fn get(&self, epoch: u64, epoch_length: u64) -> (Arc<T>, Option<Arc<T>>) {
        // Evicted and superseded entities are dropped after the lock is
        // released; dropping one may unmap a large dump.
        let (item, future, _released) = self.lookup(epoch, epoch_length);
        (item, future)
    }

    fn lookup(&self, epoch: u64, epoch_length: u64) -> (Arc<T>, Option<Arc<T>>, Vec<Arc<T>>) {
        let mut inner = self.inner.lock();
        // Sum of both is unique for any realistic chain; hits are still
        // checked against the full pair.
        let key = epoch_length.wrapping_add(epoch);

        let mut released = Vec::new();
        let hit = inner
            .table
            .get(&key)
            .filter(|item| is_for::<T>(item, epoch, epoch_length))
            .cloned();
        let item = match hit {
            Some(item) => item,
            None => {
                let item = match &inner.future {
                    Some(future) if is_for::<T>(future, epoch, epoch_length) => {
                        trace!(kind = T::KIND.prefix(), epoch, "[ETHASH] Promoting future entry");
                        Arc::clone(future)
                    }
                    _ => {
                        trace!(kind = T::KIND.prefix(), epoch, "[ETHASH] Requiring new entry");
                        Arc::new(T::new(epoch, epoch_length))
                    }
                };
                if let Some((_, old)) = inner.table.push(key, Arc::clone(&item)) {
                    released.push(old);
                }
                item
            }
        };

        let mut future = None;
        let next = epoch.checked_add(1).filter(|_| epoch < MAX_EPOCH - 1);
        if let Some(next) = next {
            let tracked = inner
                .future
                .as_ref()
                .map_or(false, |f| is_for::<T>(f, next, epoch_length));
            if !tracked {
                trace!(kind = T::KIND.prefix(), epoch = next, "[ETHASH] Requiring new future entry");
                let created = Arc::new(T::new(next, epoch_length));
                if let Some(old) = inner.future.replace(Arc::clone(&created)) {
                    released.push(old);
                }
                future = Some(created);
            }
        }
        (item, future, released)
    }

    /// Epoch currently tracked in the look-ahead slot.
    pub fn future_epoch(&self) -> Option<u64> {
        self.inner.lock().future.as_ref().map(|f| f.epoch())
    }

    /// Epochs held in the table, most recently used first.
    pub fn cached_epochs(&self) -> Vec<u64> {
        self.inner.lock().table.iter().map(|(_, item)| item.epoch()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every entity, including the future one.
    pub fn purge(&self) {
        let (table, future) = {
            let mut inner = self.inner.lock();
            let cap = inner.table.cap();
            let table = std::mem::replace(&mut inner.table, LruCache::new(cap));
            (table, inner.future.take())
        };
        drop(table);
        drop(future);
    }
}
