//! Room registry capability

use alertcast_core::{AlertcastResult, ConnectionId, OutboundMessage, RoomName, Subscription};

/// Capability the distribution engine needs from the transport
///
/// Implementations must deliver to each connection in the order messages
/// are handed over. Broadcasting to a room without members is not an
/// error; it reaches nobody.
pub trait RoomRegistry: Send + Sync {
    /// Add a connection to a room (joining twice is a no-op)
    fn join(&self, connection: ConnectionId, room: &RoomName) -> AlertcastResult<()>;

    /// Remove a connection from every room it is in
    fn leave_all(&self, connection: ConnectionId) -> Vec<RoomName>;

    /// Deliver to every current member; returns the connections reached
    fn broadcast(&self, room: &RoomName, message: &OutboundMessage) -> AlertcastResult<Vec<ConnectionId>>;

    /// Live connections currently in a room
    fn members_of(&self, room: &RoomName) -> Vec<ConnectionId>;

    /// Deliver to one connection
    fn send_to(&self, connection: ConnectionId, message: &OutboundMessage) -> AlertcastResult<()>;

    /// Force-close a connection and drop all its memberships
    fn close_connection(&self, connection: ConnectionId) -> AlertcastResult<()>;

    /// Replace a connection's memberships with the rooms of `subscription`
    fn register(&self, subscription: &Subscription) -> AlertcastResult<Vec<RoomName>> {
        self.leave_all(subscription.connection_id);
        let rooms = subscription.rooms();
        for room in &rooms {
            self.join(subscription.connection_id, room)?;
        }
        Ok(rooms)
    }
}
