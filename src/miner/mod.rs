//! Local sealing: nonce search and hashrate bookkeeping

pub mod sealer;
pub mod stats;

pub use sealer::Seal;
pub use stats::HashrateTracker;
