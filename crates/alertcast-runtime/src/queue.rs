//! Pending queues for interval-cadence tiers

use std::collections::VecDeque;

use alertcast_core::{Alert, Tier};

/// Observable state of a tier's queue between boundaries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing waiting
    Idle,
    /// Alerts waiting for the next boundary
    Accumulating,
}

/// FIFO of alerts waiting for one tier's next aligned boundary
///
/// INVARIANT: insertion order is preserved through drain; no reordering,
/// no deduplication.
#[derive(Debug)]
pub struct PendingQueue {
    tier: Tier,
    alerts: VecDeque<Alert>,
}

impl PendingQueue {
    pub fn new(tier: Tier) -> Self {
        PendingQueue {
            tier,
            alerts: VecDeque::new(),
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn push(&mut self, alert: Alert) {
        self.alerts.push_back(alert);
    }

    /// Take every queued alert in enqueue order, leaving the queue empty
    pub fn drain(&mut self) -> Vec<Alert> {
        self.alerts.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn state(&self) -> QueueState {
        if self.alerts.is_empty() {
            QueueState::Idle
        } else {
            QueueState::Accumulating
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }
}
