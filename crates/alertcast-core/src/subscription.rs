//! Subscriber connection as seen by the distribution engine

use serde::{Deserialize, Serialize};

use crate::{ConnectionId, Role, RoomName, SubscriberId, Tier};

/// One live connection and the identity the session layer attached to it
///
/// The tier is the subscriber's tier at connect time; Alertcast never
/// re-derives it afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub connection_id: ConnectionId,
    pub subscriber_id: SubscriberId,
    pub tier: Tier,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl Subscription {
    pub fn new(connection_id: ConnectionId, subscriber_id: SubscriberId, tier: Tier) -> Self {
        Subscription {
            connection_id,
            subscriber_id,
            tier,
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self
    }

    pub fn tier_room(&self) -> RoomName {
        RoomName::tier(self.tier)
    }

    pub fn individual_room(&self) -> RoomName {
        RoomName::user(&self.subscriber_id)
    }

    pub fn role_rooms(&self) -> Vec<RoomName> {
        self.roles.iter().map(RoomName::role).collect()
    }

    /// Every room this connection belongs to: tier, roles, then individual
    pub fn rooms(&self) -> Vec<RoomName> {
        let mut rooms = Vec::with_capacity(self.roles.len() + 2);
        rooms.push(self.tier_room());
        rooms.extend(self.role_rooms());
        rooms.push(self.individual_room());
        rooms
    }
}
