//! Domain-specific error types for the ethashb3 engine
//!
//! Disk failures are almost always recoverable (the engine falls back to an
//! in-memory generation), so most of these end up in a log line rather than
//! in front of a caller.

use std::path::PathBuf;

use thiserror::Error;

/// Cache/dataset store errors (memory-mapped dumps and their fallbacks)
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid dump magic or size: {}", path.display())]
    CorruptFile { path: PathBuf },

    #[error("dump i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to remove stale dump {}: {source}", path.display())]
    StaleFileCleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot allocate {words} words for in-memory generation")]
    OutOfMemory { words: usize },
}

/// Seal verification errors
#[derive(Error, Debug)]
pub enum SealError {
    #[error("non-positive difficulty")]
    InvalidDifficulty,

    #[error("invalid mix digest")]
    InvalidMixDigest,

    #[error("invalid proof-of-work")]
    InvalidPoW,

    #[error("fake failure at block {number}")]
    FakeFailure { number: u64 },

    #[error("pow data unavailable: {0}")]
    Generation(#[from] StoreError),
}

/// Engine configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
