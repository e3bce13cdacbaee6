//! Room addressing
//!
//! Rooms are transport-level groups of live connections. Alertcast uses
//! three room classes:
//! - `tier-<tier>`: every connection of a subscription tier
//! - `role-<role>`: operational groups with cross-tier visibility
//! - `user-<subscriberId>`: every connection of one subscriber

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Role, SubscriberId, Tier};

const TIER_PREFIX: &str = "tier-";
const ROLE_PREFIX: &str = "role-";
const USER_PREFIX: &str = "user-";

/// Room class
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoomClass {
    Tier,
    Role,
    User,
    /// Any room the transport knows that Alertcast does not address
    Other,
}

/// Room name as understood by the transport
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomName(String);

impl RoomName {
    pub fn tier(tier: Tier) -> Self {
        RoomName(format!("{}{}", TIER_PREFIX, tier.as_str()))
    }

    pub fn role(role: &Role) -> Self {
        RoomName(format!("{}{}", ROLE_PREFIX, role.as_str()))
    }

    pub fn user(subscriber: &SubscriberId) -> Self {
        RoomName(format!("{}{}", USER_PREFIX, subscriber.as_str()))
    }

    /// Wrap a raw room name coming from the transport
    pub fn raw(name: impl Into<String>) -> Self {
        RoomName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn class(&self) -> RoomClass {
        if self.0.starts_with(TIER_PREFIX) {
            RoomClass::Tier
        } else if self.0.starts_with(ROLE_PREFIX) {
            RoomClass::Role
        } else if self.0.starts_with(USER_PREFIX) {
            RoomClass::User
        } else {
            RoomClass::Other
        }
    }
}

impl fmt::Debug for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Room({})", self.0)
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_room_names() {
        assert_eq!(RoomName::tier(Tier::Free).as_str(), "tier-free");
        assert_eq!(RoomName::tier(Tier::Elite).as_str(), "tier-elite");
        assert_eq!(RoomName::role(&Role::admin()).as_str(), "role-admin");
        assert_eq!(RoomName::user(&SubscriberId::new("u1")).as_str(), "user-u1");
    }

    #[test]
    fn test_room_class() {
        assert_eq!(RoomName::tier(Tier::Pro).class(), RoomClass::Tier);
        assert_eq!(RoomName::role(&Role::new("ops")).class(), RoomClass::Role);
        assert_eq!(RoomName::user(&SubscriberId::new("x")).class(), RoomClass::User);
        assert_eq!(RoomName::raw("lobby").class(), RoomClass::Other);
    }

    proptest! {
        #[test]
        fn prop_user_rooms_always_classified_as_user(id in "[a-zA-Z0-9_-]{1,32}") {
            let room = RoomName::user(&SubscriberId::new(id.clone()));
            prop_assert_eq!(room.class(), RoomClass::User);
            prop_assert!(room.as_str().ends_with(id.as_str()));
        }
    }
}
