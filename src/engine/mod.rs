//! ethashb3 engine
//!
//! Owns the cache and dataset LRUs for one PoW mode and hands out generated
//! entities by block number. Generation of the next epoch is kicked off in
//! the background whenever the LRU asks for a new look-ahead entry.

pub mod verify;

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{PowConfig, PowMode};
use crate::errors::{ConfigError, StoreError};
use crate::miner::stats::HashrateTracker;
use crate::pow::{Cache, Dataset, EpochItem, EpochLru, EpochSchedule, GenerateOptions};

pub use verify::SealHeader;

/// Mining fields guarded together.
#[derive(Debug, Default)]
struct MiningState {
    /// 0 = all cores, negative = idle
    threads: i32,
    hashrate: HashrateTracker,
}

/// Proof-of-work engine: verification caches, mining datasets and the
/// local sealer's bookkeeping.
pub struct Ethash {
    config: PowConfig,
    caches: EpochLru<Cache>,
    datasets: EpochLru<Dataset>,

    /// Engine everything is delegated to in `Shared` mode
    shared: Option<Arc<Ethash>>,
    /// Block number failing verification even in fake mode
    fake_fail: Option<u64>,
    /// Sleep before returning from a fake verification
    fake_delay: Option<Duration>,

    state: Mutex<MiningState>,
    closed: AtomicBool,
    /// Background generation jobs started so far
    jobs: AtomicUsize,
}

impl Ethash {
    /// Engine for a validated configuration. `Shared` needs the instance to
    /// share, see [`Ethash::new_shared`].
    pub fn new(mut config: PowConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.pow_mode == PowMode::Shared {
            return Err(ConfigError::Invalid(
                "shared mode requires an engine to share (Ethash::new_shared)".to_string(),
            ));
        }
        config.log_storage();
        info!(mode = %config.pow_mode, "[ETHASH] Engine created");
        Ok(Self::build(config))
    }

    fn build(config: PowConfig) -> Self {
        Ethash {
            caches: EpochLru::new(config.caches_in_mem),
            datasets: EpochLru::new(config.datasets_in_mem),
            config,
            shared: None,
            fake_fail: None,
            fake_delay: None,
            state: Mutex::new(MiningState::default()),
            closed: AtomicBool::new(false),
            jobs: AtomicUsize::new(0),
        }
    }

    /// Tiny in-memory caches and datasets, for tests.
    pub fn new_tester() -> Self {
        Self::build(PowConfig::in_memory(PowMode::Test))
    }

    /// Accepts every seal.
    pub fn new_faker() -> Self {
        Self::build(PowConfig::in_memory(PowMode::Fake))
    }

    /// Accepts every seal except the one of block `fail`.
    pub fn new_fake_failer(fail: u64) -> Self {
        Ethash {
            fake_fail: Some(fail),
            ..Self::new_faker()
        }
    }

    /// Accepts every seal after sleeping for `delay`.
    pub fn new_fake_delayer(delay: Duration) -> Self {
        Ethash {
            fake_delay: Some(delay),
            ..Self::new_faker()
        }
    }

    /// Accepts every seal; sealing takes an exponentially distributed time.
    pub fn new_poisson_faker() -> Self {
        Self::build(PowConfig::in_memory(PowMode::PoissonFake))
    }

    /// Accepts everything without any checks.
    pub fn new_full_faker() -> Self {
        Self::build(PowConfig::in_memory(PowMode::FullFake))
    }

    /// Engine delegating caches, datasets and mining state to `shared`.
    pub fn new_shared(shared: Arc<Ethash>) -> Self {
        Ethash {
            shared: Some(shared),
            ..Self::build(PowConfig::in_memory(PowMode::Shared))
        }
    }

    pub fn mode(&self) -> PowMode {
        self.config.pow_mode
    }

    pub fn schedule(&self) -> &EpochSchedule {
        &self.config.epoch_schedule
    }

    pub(crate) fn shared(&self) -> Option<&Arc<Ethash>> {
        self.shared.as_ref()
    }

    pub(crate) fn fake_fail(&self) -> Option<u64> {
        self.fake_fail
    }

    pub(crate) fn fake_delay(&self) -> Option<Duration> {
        self.fake_delay
    }

    pub fn cache_options(&self) -> GenerateOptions {
        GenerateOptions {
            dir: self.config.cache_dir.clone(),
            disk_retention: self.config.caches_on_disk,
            lock_mmap: self.config.caches_lock_mmap,
            test: self.config.pow_mode == PowMode::Test,
            schedule: *self.schedule(),
        }
    }

    pub fn dataset_options(&self) -> GenerateOptions {
        GenerateOptions {
            dir: self.config.dataset_dir.clone(),
            disk_retention: self.config.datasets_on_disk,
            lock_mmap: self.config.datasets_lock_mmap,
            test: self.config.pow_mode == PowMode::Test,
            schedule: *self.schedule(),
        }
    }

    /// Verification cache for `block`, generated before returning. A new
    /// look-ahead cache is generated in the background.
    pub fn cache_for(&self, block: u64) -> Result<Arc<Cache>, StoreError> {
        if let Some(shared) = &self.shared {
            return shared.cache_for(block);
        }
        let (epoch, epoch_length) = self.schedule().epoch_of(block);
        let (current, future) = self.caches.get(epoch, epoch_length);

        let opts = self.cache_options();
        current.generate(&opts)?;

        if let Some(future) = future {
            let name = format!("ethash-cache-{}", future.epoch());
            self.spawn_generation(name, move || future.generate(&opts));
        }
        Ok(current)
    }

    /// Mining dataset for `block`.
    ///
    /// With `async_gen` and a dataset that is not ready yet, both the current
    /// and the look-ahead dataset are generated on a background thread and
    /// the (possibly still empty) current one is returned right away; poll
    /// [`Dataset::is_ready`]. At most one such job runs per dataset.
    /// Otherwise the current dataset is generated before returning.
    pub fn dataset_for(&self, block: u64, async_gen: bool) -> Result<Arc<Dataset>, StoreError> {
        if let Some(shared) = &self.shared {
            return shared.dataset_for(block, async_gen);
        }
        let (epoch, epoch_length) = self.schedule().epoch_of(block);
        let (current, future) = self.datasets.get(epoch, epoch_length);
        let opts = self.dataset_options();

        if async_gen && !current.is_ready() {
            if current.begin_background() {
                let background = Arc::clone(&current);
                self.spawn_generation(format!("ethash-dag-{}", epoch), move || {
                    let generated = background.generate(&opts);
                    if generated.is_err() {
                        // Let a later caller retry.
                        background.end_background();
                    }
                    generated?;
                    match future {
                        Some(future) => future.generate(&opts),
                        None => Ok(()),
                    }
                });
            } else if let Some(future) = future {
                let name = format!("ethash-dag-{}", future.epoch());
                self.spawn_generation(name, move || future.generate(&opts));
            }
            return Ok(current);
        }

        current.generate(&opts)?;
        if let Some(future) = future {
            let name = format!("ethash-dag-{}", future.epoch());
            self.spawn_generation(name, move || future.generate(&opts));
        }
        Ok(current)
    }

    /// Configured mining threads (not necessarily running).
    pub fn threads(&self) -> i32 {
        if let Some(shared) = &self.shared {
            return shared.threads();
        }
        self.state.lock().threads
    }

    /// Set mining threads: 0 uses every core, negative idles the sealer.
    pub fn set_threads(&self, threads: i32) {
        if let Some(shared) = &self.shared {
            shared.set_threads(threads);
            return;
        }
        self.state.lock().threads = threads;
    }

    /// Local sealing rate over the last minute, hashes per second.
    pub fn hashrate(&self) -> f64 {
        if let Some(shared) = &self.shared {
            return shared.hashrate();
        }
        self.state.lock().hashrate.hashrate()
    }

    /// Hashes computed by the local sealer since creation.
    pub fn total_hashes(&self) -> u64 {
        if let Some(shared) = &self.shared {
            return shared.total_hashes();
        }
        self.state.lock().hashrate.total_hashes()
    }

    pub(crate) fn mark_hashes(&self, hashes: u64) {
        if hashes > 0 {
            self.state.lock().hashrate.record(hashes);
        }
    }

    /// Drop every cached entity. Runs once; later calls are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.caches.purge();
        self.datasets.purge();
        info!(mode = %self.config.pow_mode, "[ETHASH] Engine closed");
    }

    /// Background generation jobs started by this engine.
    pub fn background_jobs(&self) -> usize {
        self.jobs.load(Ordering::SeqCst)
    }

    /// Run a generation job on a detached, named thread. Failures are logged.
    fn spawn_generation<F>(&self, name: String, job: F)
    where
        F: FnOnce() -> Result<(), StoreError> + Send + 'static,
    {
        let label = name.clone();
        let spawned = thread::Builder::new().name(name).spawn(move || {
            if let Err(err) = job() {
                warn!(thread = %label, error = %err, "[ETHASH] Background generation failed");
            }
        });
        match spawned {
            Ok(_) => {
                self.jobs.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => warn!(error = %err, "[ETHASH] Failed to spawn background generation"),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Epochs currently held by the cache LRU, most recent first.
    pub fn cached_epochs(&self) -> Vec<u64> {
        self.caches.cached_epochs()
    }

    /// Epochs currently held by the dataset LRU, most recent first.
    pub fn dataset_epochs(&self) -> Vec<u64> {
        self.datasets.cached_epochs()
    }
}

impl std::fmt::Debug for Ethash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ethash")
            .field("mode", &self.config.pow_mode)
            .field("shared", &self.shared.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn export_options(dir: &Path, schedule: &EpochSchedule) -> GenerateOptions {
    GenerateOptions {
        dir: Some(dir.to_path_buf()),
        disk_retention: u64::MAX,
        lock_mmap: false,
        test: false,
        schedule: *schedule,
    }
}

/// Generate the verification cache for `block` into `dir`, outside of any
/// engine. Older dumps in `dir` are kept.
pub fn make_cache(schedule: &EpochSchedule, block: u64, dir: &Path) -> Result<Cache, StoreError> {
    let (epoch, epoch_length) = schedule.epoch_of(block);
    let cache = Cache::new(epoch, epoch_length);
    cache.generate(&export_options(dir, schedule))?;
    Ok(cache)
}

/// Generate the mining dataset for `block` into `dir`, outside of any engine.
pub fn make_dataset(
    schedule: &EpochSchedule,
    block: u64,
    dir: &Path,
) -> Result<Dataset, StoreError> {
    let (epoch, epoch_length) = schedule.epoch_of(block);
    let dataset = Dataset::new(epoch, epoch_length);
    dataset.generate(&export_options(dir, schedule))?;
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(30);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_new_rejects_shared_mode() {
        let config = PowConfig::in_memory(PowMode::Shared);
        assert!(matches!(Ethash::new(config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_cache_for_generates_current_and_future() {
        let engine = Ethash::new_tester();
        let cache = engine.cache_for(45_000).unwrap();
        assert_eq!(cache.epoch(), 1);
        assert!(cache.is_generated());
        assert_eq!(engine.cached_epochs(), vec![1]);

        // The look-ahead entry is generated in the background and promoted.
        let next = engine.cache_for(60_000).unwrap();
        assert_eq!(next.epoch(), 2);
        assert_eq!(engine.cached_epochs(), vec![2, 1]);
    }

    #[test]
    fn test_dataset_async_returns_immediately() {
        let engine = Ethash::new_tester();
        let dataset = engine.dataset_for(0, true).unwrap();
        assert!(wait_until(|| dataset.is_ready()));

        let again = engine.dataset_for(0, true).unwrap();
        assert!(Arc::ptr_eq(&dataset, &again));
        assert!(again.is_ready());
    }

    #[test]
    fn test_dataset_async_spawns_one_job() {
        let engine = Ethash::new_tester();
        for _ in 0..200 {
            engine.dataset_for(0, true).unwrap();
        }
        // Current and look-ahead dataset share the first job.
        assert_eq!(engine.background_jobs(), 1);

        let dataset = engine.dataset_for(0, true).unwrap();
        assert!(wait_until(|| dataset.is_ready()));
        engine.dataset_for(0, true).unwrap();
        assert_eq!(engine.background_jobs(), 1);
    }

    #[test]
    fn test_dataset_blocking() {
        let engine = Ethash::new_tester();
        let dataset = engine.dataset_for(100, false).unwrap();
        assert!(dataset.is_ready());
        assert_eq!(engine.dataset_epochs(), vec![0]);
    }

    #[test]
    fn test_threads_delegate_in_shared_mode() {
        let base = Arc::new(Ethash::new_tester());
        let shared = Ethash::new_shared(Arc::clone(&base));
        assert_eq!(shared.mode(), PowMode::Shared);

        shared.set_threads(6);
        assert_eq!(base.threads(), 6);
        assert_eq!(shared.threads(), 6);

        base.set_threads(-1);
        assert_eq!(shared.threads(), -1);
    }

    #[test]
    fn test_shared_uses_shared_caches() {
        let base = Arc::new(Ethash::new_tester());
        let shared = Ethash::new_shared(Arc::clone(&base));

        let a = shared.cache_for(10).unwrap();
        let b = base.cache_for(20).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(shared.cached_epochs().is_empty());
    }

    #[test]
    fn test_close_purges_once() {
        let engine = Ethash::new_tester();
        engine.cache_for(0).unwrap();
        assert!(!engine.cached_epochs().is_empty());

        engine.close();
        assert!(engine.is_closed());
        assert!(engine.cached_epochs().is_empty());
        engine.close();
    }

    #[test]
    fn test_hashrate_tracking() {
        let engine = Ethash::new_tester();
        assert_eq!(engine.hashrate(), 0.0);
        engine.mark_hashes(1_000);
        thread::sleep(Duration::from_millis(20));
        assert!(engine.hashrate() > 0.0);
    }
}
