//! Preemption channel
//!
//! Forced session termination. Never touches the cadence scheduler: the
//! notice goes out and the connections are closed right away, whatever the
//! subscriber's tier.

use alertcast_core::{AlertcastError, ConnectionId, KillEvent, RoomName};

use crate::DeliveryDispatcher;

/// What a forced termination did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TerminationReport {
    /// Connections reached by the room broadcast
    pub room_recipients: usize,
    /// Notices sent directly to members the broadcast missed
    pub direct_deliveries: usize,
    pub connections_closed: usize,
}

pub struct PreemptionChannel {
    dispatcher: DeliveryDispatcher,
}

impl PreemptionChannel {
    pub fn new(dispatcher: DeliveryDispatcher) -> Self {
        PreemptionChannel { dispatcher }
    }

    /// Notify every live session of the subscriber, then close them all
    ///
    /// Each connection receives `session.terminated` exactly once. A
    /// subscriber with no live session is already in the desired state.
    pub fn force_terminate(&self, kill: &KillEvent) -> TerminationReport {
        let registry = self.dispatcher.registry();
        let room = RoomName::user(&kill.subscriber_id);
        let notice = kill.notice();

        let reached: Vec<ConnectionId> = match registry.broadcast(&room, &notice) {
            Ok(reached) => reached,
            Err(e) => {
                tracing::warn!(room = %room, error = %e, "preemption.broadcast failed");
                Vec::new()
            }
        };

        let mut report = TerminationReport {
            room_recipients: reached.len(),
            ..TerminationReport::default()
        };

        for connection in registry.members_of(&room) {
            if !reached.contains(&connection) {
                match registry.send_to(connection, &notice) {
                    Ok(()) => report.direct_deliveries += 1,
                    Err(e) => tracing::debug!(
                        connection = %connection,
                        error = %e,
                        "preemption.send_to: connection already gone"
                    ),
                }
            }

            match registry.close_connection(connection) {
                Ok(()) => report.connections_closed += 1,
                Err(AlertcastError::ConnectionNotFound(_)) | Err(AlertcastError::ConnectionClosed(_)) => {
                    tracing::debug!(connection = %connection, "preemption.close: already disconnected");
                }
                Err(e) => tracing::warn!(connection = %connection, error = %e, "preemption.close failed"),
            }
        }

        tracing::info!(
            subscriber = %kill.subscriber_id,
            reason = %kill.reason,
            room_recipients = report.room_recipients,
            direct_deliveries = report.direct_deliveries,
            connections_closed = report.connections_closed,
            "preemption.force_terminate"
        );
        report
    }
}
