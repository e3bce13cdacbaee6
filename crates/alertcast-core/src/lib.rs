//! Alertcast Core - Fundamental types for tiered alert distribution
//!
//! This crate defines the types shared by every Alertcast component:
//! - Identifiers (ConnectionId, SubscriberId, AlertId)
//! - Tiers and roles
//! - Alerts and their kinds
//! - Room addressing
//! - Inbound events, outbound messages and kill events

pub mod id;
pub mod tier;
pub mod alert;
pub mod room;
pub mod subscription;
pub mod event;
pub mod error;

pub use id::*;
pub use tier::*;
pub use alert::*;
pub use room::*;
pub use subscription::*;
pub use event::*;
pub use error::*;
