//! Epoch and seed arithmetic
//!
//! Blocks are grouped into epochs that share one cache/dataset generation.
//! The epoch length shrinks once, at a configured transition block. Seeds
//! are always counted in units of the pre-transition (longer) epoch so a given
//! block height keeps the seed it had before the schedule changed.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Blocks per epoch before the transition.
pub const EPOCH_LENGTH_DEFAULT: u64 = 30_000;

/// Blocks per epoch from the transition block onwards.
pub const EPOCH_LENGTH_SHORT: u64 = 15_000;

/// First block mined under the short epoch length.
pub const EPOCH_TRANSITION_BLOCK: u64 = 4_200_000;

/// Epoch length schedule: one default length and an optional switch to a
/// shorter one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpochSchedule {
    /// Canonical (pre-transition) epoch length; seeds are counted in these
    pub default_length: u64,

    /// Block at which `transition_length` takes over, if any
    pub transition_block: Option<u64>,

    /// Post-transition epoch length, must divide `default_length`
    pub transition_length: u64,
}

impl Default for EpochSchedule {
    fn default() -> Self {
        Self::MAINNET
    }
}

impl EpochSchedule {
    pub const MAINNET: EpochSchedule = EpochSchedule {
        default_length: EPOCH_LENGTH_DEFAULT,
        transition_block: Some(EPOCH_TRANSITION_BLOCK),
        transition_length: EPOCH_LENGTH_SHORT,
    };

    /// Schedule that never changes its epoch length.
    pub const fn fixed(length: u64) -> Self {
        EpochSchedule {
            default_length: length,
            transition_block: None,
            transition_length: length,
        }
    }

    /// Epoch length in effect at `block`.
    pub fn epoch_length(&self, block: u64) -> u64 {
        match self.transition_block {
            Some(transition) if block >= transition => self.transition_length,
            _ => self.default_length,
        }
    }

    /// Epoch and epoch length for `block`.
    pub fn epoch_of(&self, block: u64) -> (u64, u64) {
        let length = self.epoch_length(block);
        (calc_epoch(block, length), length)
    }

    /// Seed for `epoch` counted in epochs of `epoch_length` blocks.
    ///
    /// The hash chain is always as long as the number of whole default-length
    /// epochs covering the same blocks.
    pub fn seed_hash(&self, epoch: u64, epoch_length: u64) -> [u8; 32] {
        let rounds = if epoch_length == self.default_length || self.default_length == 0 {
            epoch
        } else {
            (epoch as u128 * epoch_length as u128 / self.default_length as u128) as u64
        };
        let mut seed = [0u8; 32];
        for _ in 0..rounds {
            seed = *blake3::hash(&seed).as_bytes();
        }
        seed
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_length == 0 || self.transition_length == 0 {
            return Err(ConfigError::Invalid(
                "epoch lengths must be non-zero".to_string(),
            ));
        }
        if self.transition_block.is_some() {
            if self.transition_length > self.default_length {
                return Err(ConfigError::Invalid(format!(
                    "transition epoch length {} exceeds default {}",
                    self.transition_length, self.default_length
                )));
            }
            if self.default_length % self.transition_length != 0 {
                return Err(ConfigError::Invalid(format!(
                    "transition epoch length {} does not divide default {}",
                    self.transition_length, self.default_length
                )));
            }
        }
        Ok(())
    }
}

/// Epoch length for `block` on the mainnet schedule.
pub fn calc_epoch_length(block: u64) -> u64 {
    EpochSchedule::MAINNET.epoch_length(block)
}

/// Epoch containing `block` for a given epoch length.
pub fn calc_epoch(block: u64, epoch_length: u64) -> u64 {
    block.checked_div(epoch_length).unwrap_or(0)
}

/// Seed used to generate the cache and dataset of an epoch (mainnet schedule).
pub fn seed_hash(epoch: u64, epoch_length: u64) -> [u8; 32] {
    EpochSchedule::MAINNET.seed_hash(epoch, epoch_length)
}
