//! Cadence scheduler
//!
//! Holds one pending queue per interval-cadence tier and releases each
//! queue on the tier's aligned wall-clock boundaries.
//!
//! Per tier the queue cycles Idle -> Accumulating -> Flushing -> Idle. The
//! flush is a single drain on the owning task, so nothing enqueued during
//! a flush can be lost.
//!
//! INVARIANT: a tier is flushed at most once per boundary. The last flushed
//! boundary is remembered, so a second check inside the same boundary
//! second is a no-op.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use alertcast_core::{Alert, BatchInfo, Tier};
use alertcast_time::{duration_until, Interval};

use crate::{PendingQueue, QueueState, TierPolicyTable};

/// Alerts released together for one tier at one boundary
#[derive(Debug)]
pub struct FlushBatch {
    pub tier: Tier,
    pub boundary: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    /// Enqueue order
    pub alerts: Vec<Alert>,
}

impl FlushBatch {
    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn batch_info(&self, position: usize) -> BatchInfo {
        BatchInfo {
            boundary: self.boundary,
            window_start: self.window_start,
            position,
            size: self.alerts.len(),
        }
    }
}

/// A boundary whose flush did not happen on time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissedBoundary {
    pub tier: Tier,
    pub boundary: DateTime<Utc>,
    /// How far past the boundary the check ran
    pub drift: Duration,
    /// Alerts left waiting for the next boundary
    pub pending: usize,
}

/// Result of one scheduler check
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub batches: Vec<FlushBatch>,
    pub missed: Vec<MissedBoundary>,
}

impl TickOutcome {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.missed.is_empty()
    }
}

struct TierSlot {
    interval: Interval,
    queue: PendingQueue,
    last_flushed: Option<DateTime<Utc>>,
}

impl TierSlot {
    fn flush(&mut self, boundary: DateTime<Utc>) -> Option<FlushBatch> {
        self.last_flushed = Some(boundary);
        if self.queue.is_empty() {
            return None;
        }

        let window_start = self.interval.window_start(boundary);
        let alerts = self.queue.drain();
        for alert in alerts.iter().filter(|a| a.effective_time() < window_start) {
            tracing::debug!(
                tier = %self.queue.tier(),
                alert_id = %alert.id,
                detected = %alert.effective_time(),
                "scheduler.flush: alert carried over from an earlier window"
            );
        }
        tracing::info!(
            tier = %self.queue.tier(),
            boundary = %boundary,
            size = alerts.len(),
            "scheduler.flush"
        );

        Some(FlushBatch {
            tier: self.queue.tier(),
            boundary,
            window_start,
            alerts,
        })
    }

    fn missed(&self, boundary: DateTime<Utc>, now: DateTime<Utc>) -> MissedBoundary {
        let missed = MissedBoundary {
            tier: self.queue.tier(),
            boundary,
            drift: duration_until(boundary, now),
            pending: self.queue.len(),
        };
        tracing::warn!(
            tier = %missed.tier,
            boundary = %boundary,
            drift_ms = missed.drift.as_millis() as u64,
            pending = missed.pending,
            "scheduler.missed_boundary: alerts wait for the next boundary"
        );
        missed
    }
}

/// Wall-clock aligned flush scheduler
pub struct CadenceScheduler {
    slots: BTreeMap<Tier, TierSlot>,
    /// Maximum lateness at which an aligned wake-up still flushes
    tolerance: Duration,
    /// Previous `poll` instant, for missed-boundary detection
    last_poll: Option<DateTime<Utc>>,
}

impl CadenceScheduler {
    /// One queue per interval-cadence tier in the policy table
    pub fn new(policy: &TierPolicyTable, tolerance: Duration) -> Self {
        let slots = policy
            .interval_tiers()
            .map(|(tier, interval)| {
                (
                    tier,
                    TierSlot {
                        interval,
                        queue: PendingQueue::new(tier),
                        last_flushed: None,
                    },
                )
            })
            .collect();
        CadenceScheduler {
            slots,
            tolerance,
            last_poll: None,
        }
    }

    /// Does this tier batch through the scheduler?
    pub fn is_queued_tier(&self, tier: Tier) -> bool {
        self.slots.contains_key(&tier)
    }

    /// Append to a tier's queue; returns false for tiers without a queue
    pub fn enqueue(&mut self, tier: Tier, alert: Alert) -> bool {
        match self.slots.get_mut(&tier) {
            Some(slot) => {
                slot.queue.push(alert);
                true
            }
            None => false,
        }
    }

    /// Polling check: flush every tier whose boundary second contains `now`
    ///
    /// Every boundary that fell between the previous poll and this one,
    /// with neither poll inside its second, is reported as missed. A stall
    /// spanning several boundaries reports each of them.
    pub fn poll(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let previous = self.last_poll.replace(now);

        for slot in self.slots.values_mut() {
            let current = slot.interval.is_at_boundary(now).then(|| slot.interval.floor(now));

            if let Some(previous) = previous {
                for boundary in slot.interval.boundaries_in(previous, now) {
                    if Some(boundary) != current && slot.last_flushed != Some(boundary) {
                        outcome.missed.push(slot.missed(boundary, now));
                    }
                }
            }

            if let Some(boundary) = current {
                if slot.last_flushed != Some(boundary) {
                    outcome.batches.extend(slot.flush(boundary));
                }
            }
        }
        outcome
    }

    /// Aligned check: flush the tiers that have `boundary` as a boundary
    ///
    /// `now` is when the wake-up actually happened. Later than the
    /// tolerance past `boundary` counts as a missed boundary; earlier than
    /// `boundary` flushes nothing.
    pub fn flush_boundary(&mut self, boundary: DateTime<Utc>, now: DateTime<Utc>) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if now < boundary {
            tracing::debug!(boundary = %boundary, now = %now, "scheduler.flush_boundary: woke early");
            return outcome;
        }
        let late = duration_until(boundary, now) > self.tolerance;

        for slot in self.slots.values_mut() {
            if slot.interval.floor(boundary) != boundary || slot.last_flushed == Some(boundary) {
                continue;
            }
            if late {
                outcome.missed.push(slot.missed(boundary, now));
            } else {
                outcome.batches.extend(slot.flush(boundary));
            }
        }
        outcome
    }

    /// Earliest boundary of any interval tier strictly after `now`
    pub fn next_boundary(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.slots.values().map(|slot| slot.interval.next_after(now)).min()
    }

    /// Discard every queued alert (shutdown); returns per-tier counts
    pub fn drain_all(&mut self) -> Vec<(Tier, usize)> {
        self.slots
            .iter_mut()
            .map(|(tier, slot)| (*tier, slot.queue.drain().len()))
            .collect()
    }

    pub fn queue_len(&self, tier: Tier) -> usize {
        self.slots.get(&tier).map_or(0, |slot| slot.queue.len())
    }

    pub fn queue_state(&self, tier: Tier) -> Option<QueueState> {
        self.slots.get(&tier).map(|slot| slot.queue.state())
    }

    pub fn pending_total(&self) -> usize {
        self.slots.values().map(|slot| slot.queue.len()).sum()
    }

    /// Alerts currently queued for a tier, in enqueue order
    pub fn pending(&self, tier: Tier) -> Vec<&Alert> {
        self.slots
            .get(&tier)
            .map(|slot| slot.queue.iter().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertcast_core::AlertKind;
    use chrono::{TimeZone, Timelike};
    use proptest::prelude::*;
    use serde_json::Value;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    fn alert(id: &str, t: DateTime<Utc>) -> Alert {
        Alert::new(id, AlertKind::Volume, t, Value::Null)
    }

    fn scheduler() -> CadenceScheduler {
        CadenceScheduler::new(&TierPolicyTable::standard(), Duration::from_secs(1))
    }

    fn ids(batch: &FlushBatch) -> Vec<&str> {
        batch.alerts.iter().map(|a| a.id.as_str()).collect()
    }

    #[test]
    fn test_only_interval_tiers_have_queues() {
        let mut s = scheduler();
        assert!(s.is_queued_tier(Tier::Free));
        assert!(s.is_queued_tier(Tier::Pro));
        assert!(!s.is_queued_tier(Tier::Elite));
        assert!(!s.enqueue(Tier::Elite, alert("x", at(14, 0, 0))));
        assert_eq!(s.queue_state(Tier::Elite), None);
    }

    #[test]
    fn test_poll_flushes_batch_in_enqueue_order_at_boundary() {
        let mut s = scheduler();
        s.enqueue(Tier::Pro, alert("A", at(14, 2, 0)));
        s.enqueue(Tier::Pro, alert("B", at(14, 3, 0)));
        s.enqueue(Tier::Pro, alert("C", at(14, 4, 0)));
        assert_eq!(s.queue_state(Tier::Pro), Some(QueueState::Accumulating));

        assert!(s.poll(at(14, 4, 59)).is_empty());

        let outcome = s.poll(at(14, 5, 0));
        assert_eq!(outcome.batches.len(), 1);
        let batch = &outcome.batches[0];
        assert_eq!(batch.tier, Tier::Pro);
        assert_eq!(batch.boundary, at(14, 5, 0));
        assert_eq!(batch.window_start, at(14, 0, 0));
        assert_eq!(ids(batch), vec!["A", "B", "C"]);
        assert_eq!(s.queue_state(Tier::Pro), Some(QueueState::Idle));
    }

    #[test]
    fn test_same_boundary_second_flushes_once() {
        let mut s = scheduler();
        s.enqueue(Tier::Pro, alert("A", at(14, 4, 0)));

        assert_eq!(s.poll(at(14, 5, 0)).batches.len(), 1);

        s.enqueue(Tier::Pro, alert("B", at(14, 5, 0)));
        let again = s.poll(at(14, 5, 0) + chrono::Duration::milliseconds(600));
        assert!(again.is_empty());
        assert_eq!(s.queue_len(Tier::Pro), 1);

        let next = s.poll(at(14, 10, 0));
        assert_eq!(ids(&next.batches[0]), vec!["B"]);
    }

    #[test]
    fn test_empty_boundary_emits_nothing() {
        let mut s = scheduler();
        assert!(s.poll(at(14, 15, 0)).is_empty());
    }

    #[test]
    fn test_free_tier_waits_for_quarter_hour() {
        let mut s = scheduler();
        s.enqueue(Tier::Free, alert("btc", at(14, 3, 0)));

        for minute in [5, 10] {
            let outcome = s.poll(at(14, minute, 0));
            assert!(outcome.batches.iter().all(|b| b.tier != Tier::Free));
        }

        let outcome = s.poll(at(14, 15, 0));
        let free: Vec<&FlushBatch> = outcome.batches.iter().filter(|b| b.tier == Tier::Free).collect();
        assert_eq!(free.len(), 1);
        assert_eq!(ids(free[0]), vec!["btc"]);
    }

    #[test]
    fn test_long_stall_reports_every_skipped_boundary() {
        let mut s = scheduler();
        s.enqueue(Tier::Pro, alert("A", at(14, 4, 0)));

        assert!(s.poll(at(14, 4, 0)).is_empty());
        let outcome = s.poll(at(14, 16, 30));
        let missed: Vec<(Tier, DateTime<Utc>)> = outcome.missed.iter().map(|m| (m.tier, m.boundary)).collect();
        assert_eq!(
            missed,
            vec![
                (Tier::Free, at(14, 15, 0)),
                (Tier::Pro, at(14, 5, 0)),
                (Tier::Pro, at(14, 10, 0)),
                (Tier::Pro, at(14, 15, 0)),
            ]
        );
        assert!(outcome.batches.is_empty());
        assert_eq!(s.queue_len(Tier::Pro), 1);
    }

    #[test]
    fn test_stall_ending_on_a_boundary_flushes_and_reports_the_rest() {
        let mut s = scheduler();
        s.enqueue(Tier::Pro, alert("A", at(14, 4, 0)));

        assert!(s.poll(at(14, 4, 0)).is_empty());
        let outcome = s.poll(at(14, 10, 0));
        assert_eq!(outcome.missed.len(), 1);
        assert_eq!(outcome.missed[0].boundary, at(14, 5, 0));
        assert_eq!(ids(&outcome.batches[0]), vec!["A"]);
    }

    #[test]
    fn test_poll_reports_skipped_boundary_second() {
        let mut s = scheduler();
        s.enqueue(Tier::Pro, alert("A", at(14, 4, 0)));

        assert!(s.poll(at(14, 4, 59)).is_empty());
        let outcome = s.poll(at(14, 5, 2));
        assert!(outcome.batches.is_empty());
        assert_eq!(
            outcome.missed,
            vec![MissedBoundary {
                tier: Tier::Pro,
                boundary: at(14, 5, 0),
                drift: Duration::from_secs(2),
                pending: 1,
            }]
        );

        assert!(s.poll(at(14, 5, 3)).is_empty());
        assert_eq!(ids(&s.poll(at(14, 10, 0)).batches[0]), vec!["A"]);
    }

    #[test]
    fn test_flush_boundary_within_tolerance() {
        let mut s = scheduler();
        s.enqueue(Tier::Free, alert("F", at(14, 1, 0)));
        s.enqueue(Tier::Pro, alert("P", at(14, 1, 0)));

        let outcome = s.flush_boundary(at(14, 5, 0), at(14, 5, 0) + chrono::Duration::milliseconds(300));
        assert_eq!(outcome.batches.len(), 1);
        assert_eq!(outcome.batches[0].tier, Tier::Pro);
        assert_eq!(s.queue_len(Tier::Free), 1);

        let outcome = s.flush_boundary(at(14, 15, 0), at(14, 15, 0));
        let tiers: Vec<Tier> = outcome.batches.iter().map(|b| b.tier).collect();
        assert_eq!(tiers, vec![Tier::Free]);
    }

    #[test]
    fn test_flush_boundary_late_is_missed() {
        let mut s = scheduler();
        s.enqueue(Tier::Pro, alert("P", at(14, 1, 0)));

        let outcome = s.flush_boundary(at(14, 5, 0), at(14, 5, 3));
        assert!(outcome.batches.is_empty());
        assert_eq!(outcome.missed.len(), 1);
        assert_eq!(outcome.missed[0].drift, Duration::from_secs(3));
        assert_eq!(s.queue_len(Tier::Pro), 1);

        let outcome = s.flush_boundary(at(14, 10, 0), at(14, 10, 0));
        assert_eq!(ids(&outcome.batches[0]), vec!["P"]);
    }

    #[test]
    fn test_flush_boundary_early_and_repeat() {
        let mut s = scheduler();
        s.enqueue(Tier::Pro, alert("P", at(14, 1, 0)));

        assert!(s.flush_boundary(at(14, 5, 0), at(14, 4, 59)).is_empty());
        assert_eq!(s.flush_boundary(at(14, 5, 0), at(14, 5, 0)).batches.len(), 1);

        s.enqueue(Tier::Pro, alert("Q", at(14, 5, 0)));
        assert!(s.flush_boundary(at(14, 5, 0), at(14, 5, 0)).is_empty());
        assert_eq!(s.queue_len(Tier::Pro), 1);
    }

    #[test]
    fn test_next_boundary_is_earliest_tier() {
        let s = scheduler();
        assert_eq!(s.next_boundary(at(14, 3, 0)), Some(at(14, 5, 0)));
        assert_eq!(s.next_boundary(at(14, 5, 0)), Some(at(14, 10, 0)));

        let elite_only = CadenceScheduler::new(
            &TierPolicyTable::from_config(&[
                crate::TierPolicyConfig::new(Tier::Free, alertcast_time::Cadence::Immediate, vec![]),
                crate::TierPolicyConfig::new(Tier::Pro, alertcast_time::Cadence::Immediate, vec![]),
                crate::TierPolicyConfig::new(Tier::Elite, alertcast_time::Cadence::Immediate, vec![]),
            ])
            .unwrap(),
            Duration::from_secs(1),
        );
        assert_eq!(elite_only.next_boundary(at(14, 3, 0)), None);
    }

    #[test]
    fn test_drain_all_reports_counts() {
        let mut s = scheduler();
        s.enqueue(Tier::Free, alert("a", at(14, 1, 0)));
        s.enqueue(Tier::Free, alert("b", at(14, 1, 0)));
        s.enqueue(Tier::Pro, alert("c", at(14, 1, 0)));

        assert_eq!(s.drain_all(), vec![(Tier::Free, 2), (Tier::Pro, 1)]);
        assert_eq!(s.pending_total(), 0);
    }

    proptest! {
        #[test]
        fn prop_pro_flushes_iff_aligned(secs in 0i64..(2 * 3600)) {
            let mut s = scheduler();
            let now = at(12, 0, 1) + chrono::Duration::seconds(secs);
            s.enqueue(Tier::Pro, alert("x", now));
            let flushed = s.poll(now).batches.iter().any(|b| b.tier == Tier::Pro);
            prop_assert_eq!(flushed, now.minute() % 5 == 0 && now.second() == 0);
        }

        #[test]
        fn prop_flush_preserves_enqueue_order(count in 1usize..40) {
            let mut s = scheduler();
            let names: Vec<String> = (0..count).map(|i| format!("a{}", i)).collect();
            for name in &names {
                s.enqueue(Tier::Pro, alert(name, at(14, 1, 0)));
            }
            let outcome = s.poll(at(14, 5, 0));
            let flushed: Vec<String> = outcome.batches[0].alerts.iter().map(|a| a.id.0.clone()).collect();
            prop_assert_eq!(flushed, names);
        }
    }
}
