//! Alertcast Test Harness - Scenario simulation and delivery validation
//!
//! This crate provides:
//! - A scenario harness (manual clock, in-memory rooms, recorded streams)
//! - Tick jitter simulation for the poll scheduler
//! - End-to-end delivery scenarios

pub mod scenario;
pub mod jitter;
pub mod integration;

pub use scenario::*;
pub use jitter::*;
pub use integration::*;
