//! Async driver
//!
//! Runs a [`DistributionEngine`] on its own task. Inbound events arrive on
//! a bounded command channel; boundaries are found either by sleeping until
//! the next aligned boundary or by a 1-second poll. Commands and timer
//! wake-ups are handled one at a time, so a check never overlaps another.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use alertcast_core::{
    Alert, AlertcastError, AlertcastResult, ConnectionId, InboundEvent, KillReason, SubscriberId, Subscription,
};
use alertcast_time::duration_until;

use crate::{DistributionEngine, EngineConfig, EngineStats, SchedulerMode, TerminationReport};

enum Command {
    Event(InboundEvent),
    Terminate {
        subscriber_id: SubscriberId,
        reason: KillReason,
        message: Option<String>,
        reply: oneshot::Sender<TerminationReport>,
    },
    Shutdown,
}

/// Cloneable handle to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    stats: Arc<RwLock<EngineStats>>,
}

impl EngineHandle {
    /// Queue an inbound event
    pub async fn send(&self, event: InboundEvent) -> AlertcastResult<()> {
        self.commands
            .send(Command::Event(event))
            .await
            .map_err(|_| AlertcastError::EngineStopped)
    }

    pub async fn ingest(&self, alert: Alert) -> AlertcastResult<()> {
        self.send(InboundEvent::AlertDetected(alert)).await
    }

    pub async fn connect(&self, subscription: Subscription) -> AlertcastResult<()> {
        self.send(InboundEvent::SubscriberConnected(subscription)).await
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) -> AlertcastResult<()> {
        self.send(InboundEvent::SubscriberDisconnected { connection_id }).await
    }

    /// Terminate every session of a subscriber and wait for the report
    pub async fn terminate(
        &self,
        subscriber_id: SubscriberId,
        reason: KillReason,
        message: Option<String>,
    ) -> AlertcastResult<TerminationReport> {
        let (reply, report) = oneshot::channel();
        self.commands
            .send(Command::Terminate {
                subscriber_id,
                reason,
                message,
                reply,
            })
            .await
            .map_err(|_| AlertcastError::EngineStopped)?;
        report.await.map_err(|_| AlertcastError::EngineStopped)
    }

    /// Ask the driver to stop; queued alerts are discarded
    pub async fn shutdown(&self) -> AlertcastResult<()> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| AlertcastError::EngineStopped)
    }

    /// Stats as of the last handled command or timer wake-up
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }
}

/// Spawn the driver task; it resolves to the final stats once stopped
pub fn spawn_engine(engine: DistributionEngine, config: &EngineConfig) -> (EngineHandle, JoinHandle<EngineStats>) {
    let (commands, inbox) = mpsc::channel(config.command_buffer);
    let stats = Arc::new(RwLock::new(engine.stats().clone()));
    let handle = EngineHandle {
        commands,
        stats: stats.clone(),
    };

    // Taken before the task first runs so a boundary reached while the
    // task is still being scheduled is not skipped.
    let target = match config.scheduler.mode {
        SchedulerMode::Aligned => engine.next_boundary(),
        SchedulerMode::Poll => None,
    };

    let driver = Driver {
        engine,
        target,
        mode: config.scheduler.mode,
        tick_interval: config.scheduler.tick_interval,
        stats,
    };
    (handle, tokio::spawn(driver.run(inbox)))
}

struct Driver {
    engine: DistributionEngine,
    /// Next aligned boundary; advanced only once that boundary is handled
    target: Option<DateTime<Utc>>,
    mode: SchedulerMode,
    tick_interval: std::time::Duration,
    stats: Arc<RwLock<EngineStats>>,
}

impl Driver {
    async fn run(mut self, mut inbox: mpsc::Receiver<Command>) -> EngineStats {
        tracing::info!(mode = ?self.mode, "driver.start");

        let mut poll = time::interval(self.tick_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let polling = self.mode == SchedulerMode::Poll;

        loop {
            let target = self.target;
            let wait = target.map(|t| duration_until(self.engine.now(), t)).unwrap_or_default();

            tokio::select! {
                biased;

                command = inbox.recv() => match command {
                    Some(Command::Event(event)) => self.engine.handle(event),
                    Some(Command::Terminate { subscriber_id, reason, message, reply }) => {
                        let report = self.engine.account_terminated(subscriber_id, reason, message);
                        self.publish();
                        let _ = reply.send(report);
                    }
                    Some(Command::Shutdown) | None => break,
                },

                _ = time::sleep(wait), if target.is_some() => {
                    if let Some(boundary) = target {
                        if self.engine.now() >= boundary {
                            self.engine.flush_boundary(boundary);
                            self.target = self.engine.next_boundary();
                        }
                    }
                }

                _ = poll.tick(), if polling => {
                    self.engine.tick();
                }
            }

            self.publish();
        }

        self.engine.shutdown();
        self.publish();
        tracing::info!("driver.stop");
        self.engine.stats().clone()
    }

    fn publish(&self) {
        *self.stats.write() = self.engine.stats().clone();
    }
}
