//! Engine behaviour with on-disk dumps

use std::fs;
use std::sync::Arc;
use std::thread;

use ethashb3::pow::files::{dump_path, DumpKind};
use ethashb3::pow::store::open_dump;
use ethashb3::pow::EpochItem;
use ethashb3::{make_cache, Ethash, EpochSchedule, PowConfig, PowMode};
use tempfile::TempDir;

fn disk_config(dir: &TempDir) -> PowConfig {
    PowConfig {
        cache_dir: Some(dir.path().join("caches")),
        dataset_dir: Some(dir.path().join("dags")),
        pow_mode: PowMode::Test,
        ..Default::default()
    }
}

#[test]
fn test_cache_survives_restart() {
    let dir = TempDir::new().unwrap();

    let first = Ethash::new(disk_config(&dir)).unwrap();
    let cache = first.cache_for(10).unwrap();
    assert!(cache.is_mapped());
    let words = cache.words().unwrap().to_vec();
    first.close();
    drop(cache);

    let seed = EpochSchedule::MAINNET.seed_hash(0, 30_000);
    let path = dump_path(&dir.path().join("caches"), DumpKind::Cache, 0, &seed);
    assert!(path.exists());

    let second = Ethash::new(disk_config(&dir)).unwrap();
    let reloaded = second.cache_for(10).unwrap();
    assert_eq!(reloaded.fill_count(), 0);
    assert_eq!(reloaded.words().unwrap(), &words[..]);
}

#[test]
fn test_disk_dataset_matches_memory() {
    let dir = TempDir::new().unwrap();
    let disk = Ethash::new(disk_config(&dir)).unwrap();
    let memory = Ethash::new_tester();

    let a = disk.dataset_for(0, false).unwrap();
    let b = memory.dataset_for(0, false).unwrap();
    assert!(a.is_mapped());
    assert!(!b.is_mapped());
    assert_eq!(a.words(), b.words());
}

#[test]
fn test_disk_disabled_by_zero_retention() {
    let dir = TempDir::new().unwrap();
    let config = PowConfig {
        caches_on_disk: 0,
        ..disk_config(&dir)
    };
    let engine = Ethash::new(config).unwrap();
    let cache = engine.cache_for(0).unwrap();
    assert!(!cache.is_mapped());
    assert!(!dir.path().join("caches").exists());
}

#[test]
fn test_corrupt_dump_replaced_in_place() {
    let dir = TempDir::new().unwrap();
    let caches = dir.path().join("caches");
    fs::create_dir_all(&caches).unwrap();

    let seed = EpochSchedule::MAINNET.seed_hash(0, 30_000);
    let path = dump_path(&caches, DumpKind::Cache, 0, &seed);
    fs::write(&path, b"definitely not a cache").unwrap();
    assert!(open_dump(&path, None, false).is_err());

    let engine = Ethash::new(disk_config(&dir)).unwrap();
    let cache = engine.cache_for(0).unwrap();
    assert_eq!(cache.fill_count(), 1);

    let dump = open_dump(&path, Some(cache.words().unwrap().len()), false).unwrap();
    assert_eq!(dump.words(), cache.words().unwrap());
}

#[test]
fn test_concurrent_callers_share_one_generation() {
    let engine = Arc::new(Ethash::new_tester());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.cache_for(1_000 + i).unwrap())
        })
        .collect();

    let caches: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(caches.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(caches[0].fill_count(), 1);
}

#[test]
fn test_make_cache_exports_full_size() {
    let dir = TempDir::new().unwrap();
    let schedule = EpochSchedule::MAINNET;
    let cache = make_cache(&schedule, 0, dir.path()).unwrap();
    assert_eq!(cache.epoch(), 0);
    assert!(cache.is_mapped());

    let path = dump_path(dir.path(), DumpKind::Cache, 0, &schedule.seed_hash(0, 30_000));
    let len = fs::metadata(&path).unwrap().len();
    assert_eq!(len, 8 + ethashb3::pow::cache_size(0));
}
