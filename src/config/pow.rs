use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::errors::ConfigError;
use crate::pow::EpochSchedule;

/// Type and amount of PoW verification an engine performs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowMode {
    /// Full sized caches and datasets
    #[default]
    Normal,
    /// Delegate everything to an injected shared engine
    Shared,
    /// Tiny caches and datasets for tests
    Test,
    /// Accept every seal, optionally failing one block or delaying
    Fake,
    /// Like `Fake`, but sealing takes a random (exponential) time
    PoissonFake,
    /// Accept everything without any checks
    FullFake,
}

impl PowMode {
    /// Whether seals are checked at all.
    pub fn is_fake(self) -> bool {
        matches!(self, PowMode::Fake | PowMode::PoissonFake | PowMode::FullFake)
    }
}

impl fmt::Display for PowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PowMode::Normal => "Normal",
            PowMode::Shared => "Shared",
            PowMode::Test => "Test",
            PowMode::Fake => "Fake",
            PowMode::PoissonFake => "PoissonFake",
            PowMode::FullFake => "FullFake",
        };
        f.write_str(name)
    }
}

impl FromStr for PowMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(PowMode::Normal),
            "shared" => Ok(PowMode::Shared),
            "test" => Ok(PowMode::Test),
            "fake" => Ok(PowMode::Fake),
            "poissonfake" => Ok(PowMode::PoissonFake),
            "fullfake" => Ok(PowMode::FullFake),
            other => Err(ConfigError::Invalid(format!("unknown pow mode: {}", other))),
        }
    }
}

fn default_caches_in_mem() -> usize {
    2
}

fn default_caches_on_disk() -> u64 {
    3
}

fn default_datasets_in_mem() -> usize {
    1
}

fn default_datasets_on_disk() -> u64 {
    2
}

fn default_dataset_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ethashb3"))
}

/// Cache and dataset storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowConfig {
    /// Directory for verification cache dumps (none = memory only)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Verification caches kept in memory (at least 1)
    #[serde(default = "default_caches_in_mem")]
    pub caches_in_mem: usize,

    /// Epochs of cache dumps kept on disk (0 disables disk use)
    #[serde(default = "default_caches_on_disk")]
    pub caches_on_disk: u64,

    /// Pin mapped cache dumps in RAM
    #[serde(default)]
    pub caches_lock_mmap: bool,

    /// Directory for dataset dumps
    #[serde(default = "default_dataset_dir")]
    pub dataset_dir: Option<PathBuf>,

    /// Mining datasets kept in memory (at least 1)
    #[serde(default = "default_datasets_in_mem")]
    pub datasets_in_mem: usize,

    /// Epochs of dataset dumps kept on disk (0 disables disk use)
    #[serde(default = "default_datasets_on_disk")]
    pub datasets_on_disk: u64,

    /// Pin mapped dataset dumps in RAM
    #[serde(default)]
    pub datasets_lock_mmap: bool,

    #[serde(default)]
    pub pow_mode: PowMode,

    #[serde(default)]
    pub epoch_schedule: EpochSchedule,
}

impl Default for PowConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            caches_in_mem: default_caches_in_mem(),
            caches_on_disk: default_caches_on_disk(),
            caches_lock_mmap: false,
            dataset_dir: default_dataset_dir(),
            datasets_in_mem: default_datasets_in_mem(),
            datasets_on_disk: default_datasets_on_disk(),
            datasets_lock_mmap: false,
            pow_mode: PowMode::Normal,
            epoch_schedule: EpochSchedule::default(),
        }
    }
}

impl PowConfig {
    /// Memory-only configuration for the given mode.
    pub fn in_memory(pow_mode: PowMode) -> Self {
        Self {
            cache_dir: None,
            dataset_dir: None,
            pow_mode,
            ..Default::default()
        }
    }

    /// Load a TOML config file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: PowConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `ETHASHB3_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ETHASHB3_*` style overrides from an arbitrary lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn dir(val: String) -> Option<PathBuf> {
            let val = val.trim();
            (!val.is_empty()).then(|| PathBuf::from(val))
        }
        fn flag(val: String) -> bool {
            val.trim().eq_ignore_ascii_case("true")
        }
        fn number<T: FromStr>(key: &str, val: String) -> Result<T, ConfigError> {
            val.trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{} is not a number: {}", key, val)))
        }

        // ETHASHB3_CACHE_DIR (empty disables disk caches)
        if let Some(val) = lookup("ETHASHB3_CACHE_DIR") {
            self.cache_dir = dir(val);
        }
        if let Some(val) = lookup("ETHASHB3_CACHES_IN_MEM") {
            self.caches_in_mem = number("ETHASHB3_CACHES_IN_MEM", val)?;
        }
        if let Some(val) = lookup("ETHASHB3_CACHES_ON_DISK") {
            self.caches_on_disk = number("ETHASHB3_CACHES_ON_DISK", val)?;
        }
        if let Some(val) = lookup("ETHASHB3_CACHES_LOCK_MMAP") {
            self.caches_lock_mmap = flag(val);
        }

        // ETHASHB3_DATASET_DIR (empty disables disk datasets)
        if let Some(val) = lookup("ETHASHB3_DATASET_DIR") {
            self.dataset_dir = dir(val);
        }
        if let Some(val) = lookup("ETHASHB3_DATASETS_IN_MEM") {
            self.datasets_in_mem = number("ETHASHB3_DATASETS_IN_MEM", val)?;
        }
        if let Some(val) = lookup("ETHASHB3_DATASETS_ON_DISK") {
            self.datasets_on_disk = number("ETHASHB3_DATASETS_ON_DISK", val)?;
        }
        if let Some(val) = lookup("ETHASHB3_DATASETS_LOCK_MMAP") {
            self.datasets_lock_mmap = flag(val);
        }

        if let Some(val) = lookup("ETHASHB3_POW_MODE") {
            self.pow_mode = val.parse()?;
        }
        Ok(())
    }

    /// Normalise in-memory counts and check the epoch schedule.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.caches_in_mem == 0 {
            warn!(requested = self.caches_in_mem, "[ETHASH] One cache must always be in memory");
            self.caches_in_mem = 1;
        }
        if self.datasets_in_mem == 0 {
            warn!(requested = self.datasets_in_mem, "[ETHASH] One dataset must always be in memory");
            self.datasets_in_mem = 1;
        }
        self.epoch_schedule.validate()
    }

    /// Log where dumps will be kept.
    pub fn log_storage(&self) {
        if let (Some(dir), true) = (&self.cache_dir, self.caches_on_disk > 0) {
            info!(dir = %dir.display(), count = self.caches_on_disk, "[ETHASH] Disk storage enabled for caches");
        }
        if let (Some(dir), true) = (&self.dataset_dir, self.datasets_on_disk > 0) {
            info!(dir = %dir.display(), count = self.datasets_on_disk, "[ETHASH] Disk storage enabled for datasets");
        }
    }
}
