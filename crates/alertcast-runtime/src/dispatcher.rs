//! Delivery dispatcher
//!
//! Hands messages to the room registry. Delivery is fire-and-forget: an
//! empty room or a failing transport is logged and never reaches the
//! caller as an error, so one bad send cannot stall the scheduler.

use std::collections::HashSet;
use std::sync::Arc;

use alertcast_core::{AlertcastResult, ConnectionId, OutboundMessage, RoomName};
use alertcast_rooms::RoomRegistry;

/// What became of one room delivery
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Reached this many connections
    Delivered(usize),
    /// Nobody is listening on the room
    NoListeners,
    /// The transport rejected the broadcast
    Failed,
}

impl DeliveryOutcome {
    pub fn recipients(self) -> usize {
        match self {
            DeliveryOutcome::Delivered(n) => n,
            DeliveryOutcome::NoListeners | DeliveryOutcome::Failed => 0,
        }
    }
}

#[derive(Clone)]
pub struct DeliveryDispatcher {
    registry: Arc<dyn RoomRegistry>,
}

impl DeliveryDispatcher {
    pub fn new(registry: Arc<dyn RoomRegistry>) -> Self {
        DeliveryDispatcher { registry }
    }

    pub fn registry(&self) -> &Arc<dyn RoomRegistry> {
        &self.registry
    }

    /// Broadcast `message` to `room`
    pub fn deliver(&self, room: &RoomName, message: &OutboundMessage) -> DeliveryOutcome {
        self.deliver_excluding(room, message, &HashSet::new()).0
    }

    /// Deliver to every member of `room` not in `exclude`
    ///
    /// Returns the outcome and the connections reached. With nothing to
    /// exclude this is a plain room broadcast; otherwise members are sent to
    /// one by one.
    pub fn deliver_excluding(
        &self,
        room: &RoomName,
        message: &OutboundMessage,
        exclude: &HashSet<ConnectionId>,
    ) -> (DeliveryOutcome, Vec<ConnectionId>) {
        let alert_id = match message {
            OutboundMessage::AlertDelivered(delivery) => Some(&delivery.alert_id),
            OutboundMessage::SessionTerminated(_) => None,
        };

        let result = if exclude.is_empty() {
            self.registry.broadcast(room, message)
        } else {
            self.send_each(room, message, exclude)
        };

        match result {
            Ok(reached) if reached.is_empty() => {
                tracing::debug!(
                    room = %room,
                    event = message.event_name(),
                    alert_id = ?alert_id,
                    skipped = exclude.len(),
                    "dispatcher.deliver: no listeners"
                );
                (DeliveryOutcome::NoListeners, reached)
            }
            Ok(reached) => {
                tracing::info!(
                    room = %room,
                    event = message.event_name(),
                    alert_id = ?alert_id,
                    recipients = reached.len(),
                    "dispatcher.deliver"
                );
                (DeliveryOutcome::Delivered(reached.len()), reached)
            }
            Err(e) => {
                tracing::warn!(
                    room = %room,
                    event = message.event_name(),
                    alert_id = ?alert_id,
                    error = %e,
                    "dispatcher.deliver: transport error"
                );
                (DeliveryOutcome::Failed, Vec::new())
            }
        }
    }

    fn send_each(
        &self,
        room: &RoomName,
        message: &OutboundMessage,
        exclude: &HashSet<ConnectionId>,
    ) -> AlertcastResult<Vec<ConnectionId>> {
        let targets: Vec<ConnectionId> = self
            .registry
            .members_of(room)
            .into_iter()
            .filter(|c| !exclude.contains(c))
            .collect();

        let mut reached = Vec::with_capacity(targets.len());
        let mut last_error = None;
        for connection in &targets {
            match self.registry.send_to(*connection, message) {
                Ok(()) => reached.push(*connection),
                Err(e) => {
                    tracing::debug!(connection = %connection, error = %e, "dispatcher.send_to failed");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if reached.is_empty() => Err(e),
            _ => Ok(reached),
        }
    }
}
