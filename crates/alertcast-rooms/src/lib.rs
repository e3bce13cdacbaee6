//! Alertcast Rooms - Room-based delivery addressing
//!
//! The distribution engine never talks to a concrete transport. It sees a
//! narrow capability, [`RoomRegistry`]: broadcast to a room, list a room's
//! members, send to one connection, force-close a connection, and keep
//! membership current as subscribers come and go.
//!
//! [`InMemoryRoomRegistry`] is the in-process implementation: each attached
//! connection is an unbounded channel the transport's writer task drains
//! in order.

pub mod registry;
pub mod memory;

pub use registry::*;
pub use memory::*;
