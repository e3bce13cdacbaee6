//! Alertcast Runtime - Tier-aware distribution engine
//!
//! This crate implements the distribution pipeline:
//! 1. Classify an alert against the tier policy table
//! 2. Deliver immediately to immediate-cadence tiers (and mirror roles)
//! 3. Queue for interval-cadence tiers
//! 4. Flush each queue exactly once per aligned wall-clock boundary
//! 5. Deliver flushed batches to the tier room in enqueue order
//!
//! Forced session termination runs on its own path and never waits for a
//! boundary.

pub mod config;
pub mod logging;
pub mod policy;
pub mod classifier;
pub mod queue;
pub mod scheduler;
pub mod dispatcher;
pub mod preemption;
pub mod stats;
pub mod engine;
pub mod driver;

pub use config::*;
pub use logging::*;
pub use policy::*;
pub use classifier::*;
pub use queue::*;
pub use scheduler::*;
pub use dispatcher::*;
pub use preemption::*;
pub use stats::*;
pub use engine::*;
pub use driver::*;
