//! Distribution engine
//!
//! Owns the classifier, the per-tier queues and the delivery paths. One
//! engine is built at startup and handed to whatever drives it (the async
//! driver in production, a scenario harness in tests); every operation
//! takes `&mut self`, so queue mutation is confined to the owner.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use alertcast_core::{
    Alert, AlertDelivery, AlertcastResult, ConnectionId, InboundEvent, KillEvent, KillReason, OutboundMessage,
    RoomName, Role, Subscription, SubscriberId,
};
use alertcast_rooms::RoomRegistry;
use alertcast_time::{duration_until, Clock};

use crate::{
    AlertClassifier, CadenceScheduler, Classification, DeliveryDispatcher, DeliveryOutcome, EngineConfig,
    EngineStats, FlushBatch, PreemptionChannel, TerminationReport, TickOutcome, TierPolicyTable,
};

/// Summary of one boundary check
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Non-empty batches released
    pub batches: usize,
    pub alerts: usize,
    pub missed: usize,
}

pub struct DistributionEngine {
    classifier: AlertClassifier,
    scheduler: CadenceScheduler,
    dispatcher: DeliveryDispatcher,
    preemption: PreemptionChannel,
    clock: Arc<dyn Clock>,
    stats: EngineStats,
}

impl DistributionEngine {
    /// Build from validated configuration
    pub fn new(config: &EngineConfig, registry: Arc<dyn RoomRegistry>, clock: Arc<dyn Clock>) -> AlertcastResult<Self> {
        config.validate()?;
        let policy = TierPolicyTable::from_config(&config.tiers)?;
        Ok(Self::with_policy(
            policy,
            config.mirror_roles.clone(),
            config.scheduler.boundary_tolerance,
            registry,
            clock,
        ))
    }

    pub fn with_policy(
        policy: TierPolicyTable,
        mirror_roles: Vec<Role>,
        boundary_tolerance: Duration,
        registry: Arc<dyn RoomRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let scheduler = CadenceScheduler::new(&policy, boundary_tolerance);
        let dispatcher = DeliveryDispatcher::new(registry);
        DistributionEngine {
            classifier: AlertClassifier::new(policy, mirror_roles),
            scheduler,
            preemption: PreemptionChannel::new(dispatcher.clone()),
            dispatcher,
            clock,
            stats: EngineStats::default(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn scheduler(&self) -> &CadenceScheduler {
        &self.scheduler
    }

    pub fn policy(&self) -> &TierPolicyTable {
        self.classifier.policy()
    }

    /// Route one inbound event
    pub fn handle(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::AlertDetected(alert) => {
                self.ingest_alert(alert);
            }
            InboundEvent::SubscriberConnected(subscription) => {
                if let Err(e) = self.subscriber_connected(&subscription) {
                    tracing::warn!(
                        connection = %subscription.connection_id,
                        subscriber = %subscription.subscriber_id,
                        error = %e,
                        "engine.subscriber_connected failed"
                    );
                }
            }
            InboundEvent::SubscriberDisconnected { connection_id } => {
                self.subscriber_disconnected(connection_id);
            }
            InboundEvent::AccountTerminated {
                subscriber_id,
                reason,
                message,
            } => {
                self.account_terminated(subscriber_id, reason, message);
            }
        }
    }

    /// Classify an alert, deliver it to immediate targets and queue the rest
    pub fn ingest_alert(&mut self, alert: Alert) -> Classification {
        self.stats.alerts_ingested += 1;
        let classification = self.classifier.classify(&alert, &mut self.scheduler);
        if classification.is_excluded() {
            self.stats.alerts_unclassified += 1;
            return classification;
        }
        self.stats.queued += classification.queued_targets.len() as u64;

        // A connection sitting in several target rooms gets one copy
        let rooms = classification
            .immediate_targets
            .iter()
            .map(|tier| RoomName::tier(*tier))
            .chain(classification.mirror_roles.iter().map(RoomName::role));

        let message = OutboundMessage::AlertDelivered(AlertDelivery::immediate(&alert));
        let mut reached = HashSet::new();
        for room in rooms {
            self.stats.immediate_deliveries += 1;
            let (outcome, connections) = self.dispatcher.deliver_excluding(&room, &message, &reached);
            reached.extend(connections);
            self.record(outcome);
        }
        classification
    }

    /// Poll-mode check at the current clock instant
    pub fn tick(&mut self) -> FlushReport {
        let now = self.clock.now();
        let outcome = self.scheduler.poll(now);
        self.release(outcome, now)
    }

    /// Aligned-mode check of one boundary, woken at the current instant
    pub fn flush_boundary(&mut self, boundary: DateTime<Utc>) -> FlushReport {
        let now = self.clock.now();
        let outcome = self.scheduler.flush_boundary(boundary, now);
        self.release(outcome, now)
    }

    /// Earliest upcoming boundary of any interval tier
    pub fn next_boundary(&self) -> Option<DateTime<Utc>> {
        self.scheduler.next_boundary(self.clock.now())
    }

    /// Join the subscription's tier, role and individual rooms
    ///
    /// A known connection has its previous memberships replaced.
    pub fn subscriber_connected(&mut self, subscription: &Subscription) -> AlertcastResult<Vec<RoomName>> {
        let rooms = self.dispatcher.registry().register(subscription)?;
        tracing::debug!(
            connection = %subscription.connection_id,
            subscriber = %subscription.subscriber_id,
            tier = %subscription.tier,
            rooms = ?rooms,
            "engine.subscriber_connected"
        );
        Ok(rooms)
    }

    pub fn subscriber_disconnected(&mut self, connection: ConnectionId) -> Vec<RoomName> {
        let rooms = self.dispatcher.registry().leave_all(connection);
        tracing::debug!(connection = %connection, rooms = rooms.len(), "engine.subscriber_disconnected");
        rooms
    }

    /// Map an account action to a kill event and preempt
    pub fn account_terminated(
        &mut self,
        subscriber_id: SubscriberId,
        reason: KillReason,
        message: Option<String>,
    ) -> TerminationReport {
        let mut kill = KillEvent::new(subscriber_id, reason, self.clock.now());
        if let Some(message) = message {
            kill = kill.with_message(message);
        }
        self.force_terminate(&kill)
    }

    pub fn force_terminate(&mut self, kill: &KillEvent) -> TerminationReport {
        let report = self.preemption.force_terminate(kill);
        self.stats.kills += 1;
        self.stats.connections_closed += report.connections_closed as u64;
        report
    }

    /// Discard everything still queued; returns the number of alerts dropped
    pub fn shutdown(&mut self) -> usize {
        let mut dropped = 0;
        for (tier, count) in self.scheduler.drain_all() {
            if count > 0 {
                tracing::warn!(tier = %tier, dropped = count, "engine.shutdown: queued alerts discarded");
            }
            dropped += count;
        }
        self.stats.dropped_on_shutdown += dropped as u64;
        dropped
    }

    fn release(&mut self, outcome: TickOutcome, now: DateTime<Utc>) -> FlushReport {
        let mut report = FlushReport {
            missed: outcome.missed.len(),
            ..FlushReport::default()
        };
        self.stats.missed_boundaries += report.missed as u64;

        for batch in outcome.batches {
            report.batches += 1;
            report.alerts += batch.len();
            self.deliver_batch(batch, now);
        }
        self.stats.flushes += report.batches as u64;
        self.stats.flushed_alerts += report.alerts as u64;
        report
    }

    /// Release a batch to its tier room
    ///
    /// Members of a mirror room are skipped: they were sent the alert at
    /// ingest.
    fn deliver_batch(&mut self, batch: FlushBatch, now: DateTime<Utc>) {
        let room = RoomName::tier(batch.tier);
        let mirrored: HashSet<ConnectionId> = self
            .classifier
            .mirror_roles()
            .iter()
            .flat_map(|role| self.dispatcher.registry().members_of(&RoomName::role(role)))
            .collect();

        for (position, alert) in batch.alerts.iter().enumerate() {
            let message = OutboundMessage::AlertDelivered(AlertDelivery::batched(alert, batch.batch_info(position)));
            let (outcome, _) = self.dispatcher.deliver_excluding(&room, &message, &mirrored);
            tracing::debug!(
                room = %room,
                alert_id = %alert.id,
                symbol = alert.symbol().unwrap_or("-"),
                latency_ms = duration_until(alert.effective_time(), now).as_millis() as u64,
                "engine.batch_delivery"
            );
            self.record(outcome);
        }
    }

    fn record(&mut self, outcome: DeliveryOutcome) {
        if outcome == DeliveryOutcome::Failed {
            self.stats.delivery_failures += 1;
        }
    }
}
