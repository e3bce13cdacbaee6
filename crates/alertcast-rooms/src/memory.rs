//! In-memory room registry

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use alertcast_core::{AlertcastError, AlertcastResult, ConnectionId, OutboundMessage, RoomName};

use crate::RoomRegistry;

/// Receiving half of one attached connection
///
/// Yields `None` once the connection has been closed and every message
/// handed over before the close has been read.
pub type ConnectionReceiver = mpsc::UnboundedReceiver<OutboundMessage>;

struct ConnectionSlot {
    sender: mpsc::UnboundedSender<OutboundMessage>,
    rooms: HashSet<RoomName>,
}

#[derive(Default)]
struct Rooms {
    /// Connection -> outbound channel and memberships
    connections: HashMap<ConnectionId, ConnectionSlot>,
    /// Room -> members, ordered for deterministic fan-out
    rooms: HashMap<RoomName, BTreeSet<ConnectionId>>,
}

impl Rooms {
    fn remove_connection(&mut self, connection: ConnectionId) -> Option<ConnectionSlot> {
        let slot = self.connections.remove(&connection)?;
        for room in &slot.rooms {
            self.remove_member(room, connection);
        }
        Some(slot)
    }

    fn remove_member(&mut self, room: &RoomName, connection: ConnectionId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&connection);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

/// Room registry backed by per-connection channels
#[derive(Default)]
pub struct InMemoryRoomRegistry {
    inner: RwLock<Rooms>,
}

impl InMemoryRoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a transport connection; the receiver is its outbound stream
    ///
    /// Re-attaching an existing id replaces its channel and clears its rooms.
    pub fn attach(&self, connection: ConnectionId) -> ConnectionReceiver {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.inner.write();
        inner.remove_connection(connection);
        inner.connections.insert(
            connection,
            ConnectionSlot {
                sender,
                rooms: HashSet::new(),
            },
        );
        receiver
    }

    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.inner.read().connections.contains_key(&connection)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.read().connections.len()
    }

    pub fn room_size(&self, room: &RoomName) -> usize {
        self.inner.read().rooms.get(room).map_or(0, BTreeSet::len)
    }

    /// Rooms a connection currently belongs to, sorted
    pub fn rooms_of(&self, connection: ConnectionId) -> Vec<RoomName> {
        let inner = self.inner.read();
        let mut rooms: Vec<RoomName> = inner
            .connections
            .get(&connection)
            .map(|slot| slot.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    fn prune(&self, dead: &[ConnectionId]) {
        if dead.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        for connection in dead {
            inner.remove_connection(*connection);
            tracing::debug!(connection = %connection, "rooms.prune: receiver dropped");
        }
    }
}

impl RoomRegistry for InMemoryRoomRegistry {
    fn join(&self, connection: ConnectionId, room: &RoomName) -> AlertcastResult<()> {
        let mut inner = self.inner.write();
        let slot = inner
            .connections
            .get_mut(&connection)
            .ok_or(AlertcastError::ConnectionNotFound(connection))?;
        if slot.rooms.insert(room.clone()) {
            inner.rooms.entry(room.clone()).or_default().insert(connection);
        }
        Ok(())
    }

    fn leave_all(&self, connection: ConnectionId) -> Vec<RoomName> {
        let mut inner = self.inner.write();
        let rooms: Vec<RoomName> = match inner.connections.get_mut(&connection) {
            Some(slot) => slot.rooms.drain().collect(),
            None => return Vec::new(),
        };
        for room in &rooms {
            inner.remove_member(room, connection);
        }
        rooms
    }

    fn broadcast(&self, room: &RoomName, message: &OutboundMessage) -> AlertcastResult<Vec<ConnectionId>> {
        let mut reached = Vec::new();
        let mut dead = Vec::new();
        {
            let inner = self.inner.read();
            let Some(members) = inner.rooms.get(room) else {
                return Ok(reached);
            };
            for connection in members {
                let Some(slot) = inner.connections.get(connection) else {
                    continue;
                };
                if slot.sender.send(message.clone()).is_ok() {
                    reached.push(*connection);
                } else {
                    dead.push(*connection);
                }
            }
        }
        self.prune(&dead);
        Ok(reached)
    }

    fn members_of(&self, room: &RoomName) -> Vec<ConnectionId> {
        self.inner
            .read()
            .rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    fn send_to(&self, connection: ConnectionId, message: &OutboundMessage) -> AlertcastResult<()> {
        let sent = {
            let inner = self.inner.read();
            let slot = inner
                .connections
                .get(&connection)
                .ok_or(AlertcastError::ConnectionNotFound(connection))?;
            slot.sender.send(message.clone()).is_ok()
        };
        if sent {
            Ok(())
        } else {
            self.prune(&[connection]);
            Err(AlertcastError::ConnectionClosed(connection))
        }
    }

    fn close_connection(&self, connection: ConnectionId) -> AlertcastResult<()> {
        self.inner
            .write()
            .remove_connection(connection)
            .map(|_| ())
            .ok_or(AlertcastError::ConnectionNotFound(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertcast_core::{KillEvent, KillReason, SubscriberId, Subscription, Tier};
    use chrono::Utc;
    use proptest::prelude::*;

    fn notice() -> OutboundMessage {
        KillEvent::new(SubscriberId::new("u1"), KillReason::Deleted, Utc::now()).notice()
    }

    #[test]
    fn test_broadcast_reaches_members_only() {
        let registry = InMemoryRoomRegistry::new();
        let mut a = registry.attach(ConnectionId(1));
        let mut b = registry.attach(ConnectionId(2));
        let room = RoomName::tier(Tier::Pro);
        registry.join(ConnectionId(1), &room).unwrap();

        let reached = registry.broadcast(&room, &notice()).unwrap();
        assert_eq!(reached, vec![ConnectionId(1)]);
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_to_empty_room_is_not_an_error() {
        let registry = InMemoryRoomRegistry::new();
        let reached = registry.broadcast(&RoomName::raw("nobody"), &notice()).unwrap();
        assert!(reached.is_empty());
    }

    #[test]
    fn test_join_requires_attached_connection() {
        let registry = InMemoryRoomRegistry::new();
        let err = registry.join(ConnectionId(9), &RoomName::raw("x")).unwrap_err();
        assert!(matches!(err, AlertcastError::ConnectionNotFound(ConnectionId(9))));
    }

    #[test]
    fn test_register_replaces_memberships() {
        let registry = InMemoryRoomRegistry::new();
        let _rx = registry.attach(ConnectionId(1));
        let sub = Subscription::new(ConnectionId(1), SubscriberId::new("u1"), Tier::Free);
        registry.register(&sub).unwrap();
        assert_eq!(registry.room_size(&RoomName::tier(Tier::Free)), 1);

        let upgraded = Subscription { tier: Tier::Pro, ..sub };
        registry.register(&upgraded).unwrap();
        assert_eq!(registry.room_size(&RoomName::tier(Tier::Free)), 0);
        assert_eq!(registry.room_size(&RoomName::tier(Tier::Pro)), 1);
        assert_eq!(
            registry.rooms_of(ConnectionId(1)),
            vec![RoomName::tier(Tier::Pro), RoomName::user(&SubscriberId::new("u1"))]
        );
    }

    #[test]
    fn test_close_connection_ends_stream() {
        let registry = InMemoryRoomRegistry::new();
        let mut rx = registry.attach(ConnectionId(1));
        let room = RoomName::user(&SubscriberId::new("u1"));
        registry.join(ConnectionId(1), &room).unwrap();

        registry.send_to(ConnectionId(1), &notice()).unwrap();
        registry.close_connection(ConnectionId(1)).unwrap();

        assert!(rx.try_recv().is_ok());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(registry.members_of(&room).is_empty());
        assert!(matches!(
            registry.send_to(ConnectionId(1), &notice()),
            Err(AlertcastError::ConnectionNotFound(_))
        ));
        assert!(registry.close_connection(ConnectionId(1)).is_err());
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let registry = InMemoryRoomRegistry::new();
        let rx = registry.attach(ConnectionId(1));
        let room = RoomName::tier(Tier::Elite);
        registry.join(ConnectionId(1), &room).unwrap();
        drop(rx);

        let reached = registry.broadcast(&room, &notice()).unwrap();
        assert!(reached.is_empty());
        assert!(!registry.is_connected(ConnectionId(1)));
        assert_eq!(registry.connection_count(), 0);
    }

    proptest! {
        #[test]
        fn prop_membership_views_agree(ops in prop::collection::vec((0u64..6, 0usize..3, any::<bool>()), 1..60)) {
            let registry = InMemoryRoomRegistry::new();
            let rooms = [RoomName::tier(Tier::Free), RoomName::tier(Tier::Pro), RoomName::raw("role-admin")];
            let mut receivers = Vec::new();
            for id in 0..6 {
                receivers.push(registry.attach(ConnectionId(id)));
            }

            for (conn, room, join) in ops {
                if join {
                    registry.join(ConnectionId(conn), &rooms[room]).unwrap();
                } else {
                    registry.leave_all(ConnectionId(conn));
                }
            }

            for room in &rooms {
                for member in registry.members_of(room) {
                    prop_assert!(registry.rooms_of(member).contains(room));
                }
            }
        }
    }
}
