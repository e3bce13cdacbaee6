//! Alertcast Time - Wall-clock alignment for batched delivery
//!
//! This crate implements the timing side of tiered distribution:
//! - Injectable clocks (system wall clock, manual clock for simulation)
//! - Cadence definitions (immediate, interval of N minutes)
//! - Boundary arithmetic aligned to absolute time-of-day, never to
//!   process start or to the previous flush

pub mod clock;
pub mod cadence;

pub use clock::*;
pub use cadence::*;
