//! Local nonce search

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::PowMode;
use crate::engine::{Ethash, SealHeader};
use crate::errors::SealError;
use crate::pow::{hashimoto_full, target_from_difficulty, u256_leq, EpochItem};

/// Attempts between hashrate updates and stop checks of a worker.
const REPORT_INTERVAL: u64 = 1 << 15;

/// Mean sealing time of a `PoissonFake` engine running one thread.
const POISSON_MEAN: Duration = Duration::from_secs(1);

/// Nonce and mix digest completing a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seal {
    pub nonce: u64,
    pub mix_digest: [u8; 32],
}

impl Ethash {
    /// Search for a nonce sealing `header`.
    ///
    /// Returns `Ok(None)` when `stop` is raised before a solution is found.
    /// The `nonce` and `mix_digest` fields of `header` are ignored.
    pub fn seal(&self, header: &SealHeader, stop: &AtomicBool) -> Result<Option<Seal>, SealError> {
        match self.mode() {
            PowMode::PoissonFake => return Ok(self.poisson_seal(stop)),
            mode if mode.is_fake() => {
                return Ok(Some(Seal {
                    nonce: 0,
                    mix_digest: [0u8; 32],
                }))
            }
            PowMode::Shared => {
                if let Some(shared) = self.shared() {
                    return shared.seal(header, stop);
                }
            }
            _ => {}
        }
        if header.difficulty == 0 {
            return Err(SealError::InvalidDifficulty);
        }

        let threads = match self.threads() {
            t if t < 0 => {
                info!("[ETHASH] Sealer idling, thread count is negative");
                wait_for(stop, None);
                return Ok(None);
            }
            0 => num_cpus::get(),
            t => t as usize,
        };

        let dataset = self.dataset_for(header.number, false)?;
        let Some(words) = dataset.words() else {
            warn!(number = header.number, "[ETHASH] Dataset vanished before sealing");
            return Ok(None);
        };
        let target = target_from_difficulty(header.difficulty);
        let found: Mutex<Option<Seal>> = Mutex::new(None);
        let done = AtomicBool::new(false);
        let start = Instant::now();

        info!(number = header.number, epoch = dataset.epoch(), threads, "[ETHASH] Started nonce search");
        thread::scope(|scope| {
            for worker in 0..threads {
                let seed: u64 = rand::thread_rng().gen();
                let (found, done) = (&found, &done);
                scope.spawn(move || {
                    let mut nonce = seed;
                    let mut attempts = 0u64;
                    loop {
                        if attempts % REPORT_INTERVAL == 0 && attempts > 0 {
                            self.mark_hashes(REPORT_INTERVAL);
                        }
                        if stop.load(Ordering::Relaxed) || done.load(Ordering::Relaxed) {
                            break;
                        }
                        let (digest, result) = hashimoto_full(words, &header.seal_hash, nonce);
                        attempts += 1;
                        if target.map_or(true, |t| u256_leq(&result, &t)) {
                            if !done.swap(true, Ordering::SeqCst) {
                                *found.lock() = Some(Seal {
                                    nonce,
                                    mix_digest: digest,
                                });
                                debug!(worker, nonce, attempts, "[ETHASH] Nonce found");
                            }
                            break;
                        }
                        nonce = nonce.wrapping_add(1);
                    }
                    self.mark_hashes(attempts % REPORT_INTERVAL);
                });
            }
        });

        let seal = found.into_inner();
        match &seal {
            Some(s) => info!(
                number = header.number,
                nonce = s.nonce,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "[ETHASH] Sealed block"
            ),
            None => debug!(number = header.number, "[ETHASH] Nonce search aborted"),
        }
        Ok(seal)
    }

    /// Random non-zero seal after an exponentially distributed delay whose
    /// mean shrinks with the thread count.
    fn poisson_seal(&self, stop: &AtomicBool) -> Option<Seal> {
        let mut rng = rand::thread_rng();
        let threads = self.threads().max(1) as f64;
        // Inverse transform sampling; 1 - u is in (0, 1].
        let u: f64 = rng.gen();
        let delay = POISSON_MEAN.mul_f64((-(1.0 - u).ln() / threads).max(0.0));

        let nonce = rng.gen_range(1..=u64::MAX);
        let mut mix_digest = [0u8; 32];
        rng.fill(&mut mix_digest[..]);
        mix_digest[31] |= 1;

        if wait_for(stop, Some(delay)) {
            return None;
        }
        Some(Seal { nonce, mix_digest })
    }
}

/// Sleep until `stop` is raised or `limit` elapses. Returns whether `stop`
/// ended the wait.
fn wait_for(stop: &AtomicBool, limit: Option<Duration>) -> bool {
    let deadline = limit.map(|d| Instant::now() + d);
    loop {
        if stop.load(Ordering::Relaxed) {
            return true;
        }
        let step = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                (deadline - now).min(Duration::from_millis(10))
            }
            None => Duration::from_millis(10),
        };
        thread::sleep(step);
    }
}
