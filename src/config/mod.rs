//! Engine configuration

pub mod pow;

pub use pow::{PowConfig, PowMode};
