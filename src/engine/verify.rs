//! Seal verification

use std::thread;

use tracing::debug;

use super::Ethash;
use crate::config::PowMode;
use crate::errors::SealError;
use crate::pow::algorithm::TEST_DATASET_BYTES;
use crate::pow::{dataset_size, meets_difficulty, EpochItem};

/// The parts of a block header the PoW covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealHeader {
    pub number: u64,
    /// Hash of the header without nonce and mix digest
    pub seal_hash: [u8; 32],
    pub nonce: u64,
    pub mix_digest: [u8; 32],
    pub difficulty: u64,
}

impl Ethash {
    /// Full dataset size in bytes the engine hashes against for `epoch`.
    pub fn dataset_bytes(&self, epoch: u64) -> u64 {
        if self.mode() == PowMode::Test {
            TEST_DATASET_BYTES
        } else {
            dataset_size(epoch)
        }
    }

    /// Check that `header` carries a valid proof-of-work.
    ///
    /// With `fulldag`, the mining dataset is used if it is already generated
    /// (its generation is started in the background otherwise); the
    /// verification cache is the fallback.
    pub fn verify_seal(&self, header: &SealHeader, fulldag: bool) -> Result<(), SealError> {
        match self.mode() {
            PowMode::FullFake => return Ok(()),
            mode if mode.is_fake() => {
                if let Some(delay) = self.fake_delay() {
                    thread::sleep(delay);
                }
                if self.fake_fail() == Some(header.number) {
                    return Err(SealError::FakeFailure {
                        number: header.number,
                    });
                }
                return Ok(());
            }
            PowMode::Shared => {
                if let Some(shared) = self.shared() {
                    return shared.verify_seal(header, fulldag);
                }
            }
            _ => {}
        }

        if header.difficulty == 0 {
            return Err(SealError::InvalidDifficulty);
        }

        let mut computed = None;
        if fulldag {
            let dataset = self.dataset_for(header.number, true)?;
            computed = dataset.compute(&header.seal_hash, header.nonce);
            if computed.is_none() {
                debug!(number = header.number, "[ETHASH] Dataset not ready, verifying with cache");
            }
        }
        let (digest, result) = match computed {
            Some(found) => found,
            None => {
                let cache = self.cache_for(header.number)?;
                let size = self.dataset_bytes(cache.epoch());
                cache
                    .compute(size, &header.seal_hash, header.nonce)
                    .ok_or(SealError::InvalidPoW)?
            }
        };

        if digest != header.mix_digest {
            return Err(SealError::InvalidMixDigest);
        }
        if !meets_difficulty(&result, header.difficulty) {
            return Err(SealError::InvalidPoW);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn header(number: u64) -> SealHeader {
        SealHeader {
            number,
            seal_hash: [7u8; 32],
            nonce: 0,
            mix_digest: [0u8; 32],
            difficulty: 1,
        }
    }

    #[test]
    fn test_fake_modes() {
        assert!(Ethash::new_full_faker().verify_seal(&header(1), false).is_ok());
        assert!(Ethash::new_faker().verify_seal(&header(1), true).is_ok());
        assert!(Ethash::new_poisson_faker().verify_seal(&header(1), false).is_ok());

        let failer = Ethash::new_fake_failer(5);
        assert!(failer.verify_seal(&header(4), false).is_ok());
        assert!(matches!(
            failer.verify_seal(&header(5), false),
            Err(SealError::FakeFailure { number: 5 })
        ));
    }

    #[test]
    fn test_fake_delayer_sleeps() {
        let engine = Ethash::new_fake_delayer(Duration::from_millis(50));
        let start = Instant::now();
        engine.verify_seal(&header(1), false).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_rejects_zero_difficulty() {
        let engine = Ethash::new_tester();
        let mut h = header(1);
        h.difficulty = 0;
        assert!(matches!(
            engine.verify_seal(&h, false),
            Err(SealError::InvalidDifficulty)
        ));
    }

    #[test]
    fn test_verifies_computed_seal() {
        let engine = Ethash::new_tester();
        let cache = engine.cache_for(1).unwrap();
        let (digest, _) = cache
            .compute(TEST_DATASET_BYTES, &[7u8; 32], 99)
            .unwrap();

        let mut h = header(1);
        h.nonce = 99;
        h.mix_digest = digest;
        assert!(engine.verify_seal(&h, false).is_ok());
        assert!(engine.verify_seal(&h, true).is_ok());

        h.mix_digest[0] ^= 1;
        assert!(matches!(
            engine.verify_seal(&h, false),
            Err(SealError::InvalidMixDigest)
        ));
    }

    #[test]
    fn test_shared_delegates_verification() {
        let base = std::sync::Arc::new(Ethash::new_fake_failer(3));
        let shared = Ethash::new_shared(base);
        assert!(matches!(
            shared.verify_seal(&header(3), false),
            Err(SealError::FakeFailure { number: 3 })
        ));
    }
}
