//! Scenario harness
//!
//! A distribution engine wired to a manual clock and an in-memory room
//! registry, with one recorded outbound stream per simulated connection.
//! Time only moves when the scenario moves it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tokio::sync::mpsc::error::TryRecvError;

use alertcast_core::{
    Alert, AlertKind, ConnectionId, KillEvent, KillReason, OutboundMessage, Role, SubscriberId, Subscription,
    Tier,
};
use alertcast_rooms::{ConnectionReceiver, InMemoryRoomRegistry};
use alertcast_runtime::{DistributionEngine, EngineConfig, FlushReport, TerminationReport};
use alertcast_time::ManualClock;

/// Instant on the fixed scenario day (2024-03-01, UTC)
pub fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, second)
        .single()
        .unwrap_or_else(|| panic!("invalid scenario time {}:{}:{}", hour, minute, second))
}

/// Volume alert for `symbol` detected at `detected`
pub fn volume_alert(id: &str, symbol: &str, detected: DateTime<Utc>) -> Alert {
    Alert::new(
        id,
        AlertKind::Volume,
        detected,
        json!({ "symbol": symbol, "volumeRatio": 3.2, "alertType": "SPIKE" }),
    )
    .with_detection_time(detected)
}

/// Open-interest alert for `symbol` detected at `detected`
pub fn open_interest_alert(id: &str, symbol: &str, detected: DateTime<Utc>) -> Alert {
    Alert::new(
        id,
        AlertKind::OpenInterest,
        detected,
        json!({ "symbol": symbol, "direction": "up", "pctChange": 4.1 }),
    )
    .with_detection_time(detected)
}

/// What one connection has observed so far
#[derive(Clone, Debug, Default)]
pub struct ConnectionLog {
    pub messages: Vec<OutboundMessage>,
    /// The transport closed the connection
    pub closed: bool,
}

impl ConnectionLog {
    /// Ids of delivered alerts, in arrival order
    pub fn alert_ids(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::AlertDelivered(d) => Some(d.alert_id.as_str().to_string()),
                OutboundMessage::SessionTerminated(_) => None,
            })
            .collect()
    }

    pub fn terminations(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| matches!(m, OutboundMessage::SessionTerminated(_)))
            .count()
    }
}

/// Engine plus simulated transport
pub struct Scenario {
    pub clock: ManualClock,
    pub registry: Arc<InMemoryRoomRegistry>,
    pub engine: DistributionEngine,
    receivers: BTreeMap<ConnectionId, ConnectionReceiver>,
    logs: BTreeMap<ConnectionId, ConnectionLog>,
}

impl Scenario {
    pub fn new(config: &EngineConfig, start: DateTime<Utc>) -> Self {
        let clock = ManualClock::new(start);
        let registry = Arc::new(InMemoryRoomRegistry::new());
        let engine = match DistributionEngine::new(config, registry.clone(), Arc::new(clock.clone())) {
            Ok(engine) => engine,
            Err(e) => panic!("scenario config rejected: {}", e),
        };
        Scenario {
            clock,
            registry,
            engine,
            receivers: BTreeMap::new(),
            logs: BTreeMap::new(),
        }
    }

    /// Default tier table, starting at `start`
    pub fn standard(start: DateTime<Utc>) -> Self {
        Self::new(&EngineConfig::default(), start)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.engine.now()
    }

    /// Attach a connection and register it
    pub fn connect(&mut self, id: u64, subscriber: &str, tier: Tier) -> ConnectionId {
        self.connect_with_roles(id, subscriber, tier, &[])
    }

    pub fn connect_with_roles(&mut self, id: u64, subscriber: &str, tier: Tier, roles: &[&str]) -> ConnectionId {
        let connection = ConnectionId(id);
        self.receivers.insert(connection, self.registry.attach(connection));
        self.logs.entry(connection).or_default().closed = false;

        let subscription = roles.iter().fold(
            Subscription::new(connection, SubscriberId::new(subscriber), tier),
            |sub, role| sub.with_role(Role::new(role)),
        );
        if let Err(e) = self.engine.subscriber_connected(&subscription) {
            panic!("register {} failed: {}", connection, e);
        }
        connection
    }

    pub fn disconnect(&mut self, connection: ConnectionId) {
        self.engine.subscriber_disconnected(connection);
    }

    pub fn ingest(&mut self, alert: Alert) {
        self.engine.ingest_alert(alert);
    }

    pub fn set_time(&mut self, t: DateTime<Utc>) {
        self.clock.set(t);
    }

    /// Move the clock to `t` and run one poll-mode check
    pub fn tick_at(&mut self, t: DateTime<Utc>) -> FlushReport {
        self.clock.set(t);
        self.engine.tick()
    }

    /// Poll every `step` from the current instant through `until` inclusive
    pub fn run_polling(&mut self, until: DateTime<Utc>, step: Duration) -> FlushReport {
        let mut total = FlushReport::default();
        let step = chrono::Duration::from_std(step).unwrap_or_else(|_| chrono::Duration::seconds(1));
        let mut t = self.now();
        while t <= until {
            let report = self.tick_at(t);
            total.batches += report.batches;
            total.alerts += report.alerts;
            total.missed += report.missed;
            t += step;
        }
        total
    }

    /// Aligned-mode wake-up for `boundary` at instant `woke`
    pub fn wake_for(&mut self, boundary: DateTime<Utc>, woke: DateTime<Utc>) -> FlushReport {
        self.clock.set(woke);
        self.engine.flush_boundary(boundary)
    }

    pub fn kill(&mut self, subscriber: &str, reason: KillReason) -> TerminationReport {
        let kill = KillEvent::new(SubscriberId::new(subscriber), reason, self.now());
        self.engine.force_terminate(&kill)
    }

    /// Pull everything the transport has handed to each connection so far
    pub fn collect(&mut self) {
        for (connection, rx) in self.receivers.iter_mut() {
            let log = self.logs.entry(*connection).or_default();
            loop {
                match rx.try_recv() {
                    Ok(message) => log.messages.push(message),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        log.closed = true;
                        break;
                    }
                }
            }
        }
    }

    /// Everything `connection` has received, after collecting
    pub fn log(&mut self, connection: ConnectionId) -> ConnectionLog {
        self.collect();
        self.logs.get(&connection).cloned().unwrap_or_default()
    }

    /// Alert ids `connection` has received, after collecting
    pub fn received(&mut self, connection: ConnectionId) -> Vec<String> {
        self.log(connection).alert_ids()
    }
}
