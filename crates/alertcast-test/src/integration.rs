//! End-to-end delivery scenarios
//!
//! Each scenario drives a full engine through [`Scenario`] and reports what
//! subscribers observed.

use std::collections::BTreeMap;

use alertcast_core::{KillReason, Tier};
use alertcast_runtime::TerminationReport;

use crate::scenario::{at, volume_alert, ConnectionLog, Scenario};

/// What free and elite subscribers saw of one BTCUSDT volume alert
#[derive(Clone, Debug, Default)]
pub struct CandleScenarioResult {
    /// Elite deliveries right after ingest at 14:03:00
    pub elite_immediate: Vec<String>,
    /// Free deliveries observed after each checked minute
    pub free_by_minute: BTreeMap<u32, Vec<String>>,
}

/// Volume alert detected 14:03:00, polled through 14:15:00
pub fn run_candle_scenario() -> CandleScenarioResult {
    let mut scenario = Scenario::standard(at(14, 3, 0));
    let free = scenario.connect(1, "free-user", Tier::Free);
    let elite = scenario.connect(2, "elite-user", Tier::Elite);

    scenario.ingest(volume_alert("btc-1403", "BTCUSDT", at(14, 3, 0)));

    let mut result = CandleScenarioResult {
        elite_immediate: scenario.received(elite),
        ..CandleScenarioResult::default()
    };

    let mut seen = 0;
    for minute in [5, 10, 15] {
        scenario.tick_at(at(14, minute, 0));
        let all = scenario.received(free);
        result.free_by_minute.insert(minute, all[seen..].to_vec());
        seen = all.len();
    }
    result
}

/// Outcome of banning a subscriber with two live sessions
#[derive(Clone, Debug, Default)]
pub struct KillScenarioResult {
    pub report: TerminationReport,
    pub sessions: Vec<ConnectionLog>,
    /// Alerts that reached either session after the kill
    pub deliveries_after_kill: usize,
}

/// Subscriber `u1` on two connections is banned while alerts are queued
pub fn run_kill_scenario() -> KillScenarioResult {
    let mut scenario = Scenario::standard(at(14, 1, 0));
    let first = scenario.connect(1, "u1", Tier::Pro);
    let second = scenario.connect(2, "u1", Tier::Pro);

    scenario.ingest(volume_alert("queued", "SOLUSDT", at(14, 1, 0)));
    let report = scenario.kill("u1", KillReason::Banned);
    let before: usize = [first, second].iter().map(|c| scenario.log(*c).alert_ids().len()).sum();

    scenario.ingest(volume_alert("after", "SOLUSDT", at(14, 2, 0)));
    scenario.tick_at(at(14, 5, 0));

    let sessions: Vec<ConnectionLog> = [first, second].iter().map(|c| scenario.log(*c)).collect();
    let after: usize = sessions.iter().map(|log| log.alert_ids().len()).sum();

    KillScenarioResult {
        report,
        sessions,
        deliveries_after_kill: after - before,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use alertcast_core::{AlertKind, OutboundMessage, SESSION_TERMINATED};
    use alertcast_runtime::{EngineConfig, SchedulerMode};
    use proptest::prelude::*;

    use crate::scenario::open_interest_alert;

    #[test]
    fn test_candle_scenario() {
        let result = run_candle_scenario();
        assert_eq!(result.elite_immediate, vec!["btc-1403"]);
        assert!(result.free_by_minute[&5].is_empty());
        assert!(result.free_by_minute[&10].is_empty());
        assert_eq!(result.free_by_minute[&15], vec!["btc-1403"]);
    }

    #[test]
    fn test_kill_scenario() {
        let result = run_kill_scenario();
        assert_eq!(result.report.connections_closed, 2);
        assert_eq!(result.report.room_recipients + result.report.direct_deliveries, 2);
        for session in &result.sessions {
            assert_eq!(session.terminations(), 1);
            assert!(session.closed);
            assert_eq!(session.messages.last().map(|m| m.event_name()), Some(SESSION_TERMINATED));
        }
        assert_eq!(result.deliveries_after_kill, 0);
    }

    #[test]
    fn test_pro_batch_at_five_minute_mark_in_order() {
        let mut scenario = Scenario::standard(at(14, 0, 30));
        let pro = scenario.connect(1, "p", Tier::Pro);

        for (id, minute) in [("A", 2), ("B", 3), ("C", 4)] {
            scenario.set_time(at(14, minute, 0));
            scenario.ingest(volume_alert(id, "BTCUSDT", at(14, minute, 0)));
        }
        scenario.set_time(at(14, 4, 1));
        let report = scenario.run_polling(at(14, 4, 59), Duration::from_secs(1));
        assert_eq!(report.alerts, 0);
        assert!(scenario.received(pro).is_empty());

        let report = scenario.tick_at(at(14, 5, 0));
        assert_eq!(report.batches, 1);
        assert_eq!(scenario.received(pro), vec!["A", "B", "C"]);

        let log = scenario.log(pro);
        let positions: Vec<(usize, usize)> = log
            .messages
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::AlertDelivered(d) => d.batch.as_ref().map(|b| (b.position, b.size)),
                _ => None,
            })
            .collect();
        assert_eq!(positions, vec![(0, 3), (1, 3), (2, 3)]);
    }

    #[test]
    fn test_double_tick_in_boundary_second_flushes_once() {
        let mut scenario = Scenario::standard(at(14, 4, 0));
        let pro = scenario.connect(1, "p", Tier::Pro);
        scenario.ingest(volume_alert("A", "BTCUSDT", at(14, 4, 0)));

        let first = scenario.tick_at(at(14, 5, 0));
        let second = scenario.tick_at(at(14, 5, 0) + chrono::Duration::milliseconds(999));
        assert_eq!(first.alerts, 1);
        assert_eq!(second.alerts, 0);
        assert_eq!(scenario.received(pro), vec!["A"]);
        assert_eq!(scenario.engine.stats().flushes, 1);
    }

    #[test]
    fn test_late_tick_defers_to_next_boundary() {
        let mut scenario = Scenario::standard(at(14, 4, 59));
        let pro = scenario.connect(1, "p", Tier::Pro);
        scenario.ingest(volume_alert("A", "BTCUSDT", at(14, 4, 59)));

        scenario.tick_at(at(14, 4, 59));
        let late = scenario.tick_at(at(14, 5, 1));
        assert_eq!(late.missed, 1);
        assert!(scenario.received(pro).is_empty());

        scenario.set_time(at(14, 5, 2));
        scenario.run_polling(at(14, 10, 0), Duration::from_secs(1));
        assert_eq!(scenario.received(pro), vec!["A"]);
    }

    #[test]
    fn test_aligned_wakeup_within_tolerance() {
        let mut config = EngineConfig::default();
        config.scheduler.mode = SchedulerMode::Aligned;
        let mut scenario = Scenario::new(&config, at(14, 10, 0));
        let free = scenario.connect(1, "f", Tier::Free);
        scenario.ingest(volume_alert("A", "BTCUSDT", at(14, 10, 0)));

        assert_eq!(scenario.engine.next_boundary(), Some(at(14, 15, 0)));
        let report = scenario.wake_for(at(14, 15, 0), at(14, 15, 0) + chrono::Duration::milliseconds(20));
        assert_eq!(report.missed, 0);
        assert_eq!(scenario.received(free), vec!["A"]);
    }

    #[test]
    fn test_kill_preempts_pending_flush() {
        let mut scenario = Scenario::standard(at(14, 6, 0));
        let free = scenario.connect(1, "u1", Tier::Free);
        scenario.ingest(volume_alert("A", "BTCUSDT", at(14, 6, 0)));

        scenario.set_time(at(14, 7, 0));
        scenario.kill("u1", KillReason::Suspended);
        let log = scenario.log(free);
        assert!(log.closed);
        assert_eq!(log.terminations(), 1);
        assert!(log.alert_ids().is_empty());

        scenario.tick_at(at(14, 15, 0));
        assert_eq!(scenario.engine.scheduler().queue_len(Tier::Free), 0);
        assert!(scenario.received(free).is_empty());
    }

    #[test]
    fn test_kill_without_sessions_is_success() {
        let mut scenario = Scenario::standard(at(14, 6, 0));
        let report = scenario.kill("offline", KillReason::Deleted);
        assert_eq!(report.connections_closed, 0);
        assert_eq!(scenario.engine.stats().kills, 1);
    }

    #[test]
    fn test_offline_subscriber_misses_alerts() {
        let mut scenario = Scenario::standard(at(14, 1, 0));
        let elite = scenario.connect(1, "e", Tier::Elite);
        scenario.disconnect(elite);
        scenario.ingest(volume_alert("A", "BTCUSDT", at(14, 1, 0)));

        let rejoined = scenario.connect(1, "e", Tier::Elite);
        scenario.ingest(volume_alert("B", "BTCUSDT", at(14, 2, 0)));
        assert_eq!(scenario.received(rejoined), vec!["B"]);
    }

    #[test]
    fn test_admin_mirror_crosses_tiers() {
        let mut scenario = Scenario::standard(at(14, 1, 0));
        let admin = scenario.connect_with_roles(1, "ops", Tier::Free, &["admin"]);
        scenario.ingest(open_interest_alert("oi", "ETHUSDT", at(14, 1, 0)));
        assert_eq!(scenario.received(admin), vec!["oi"]);

        scenario.tick_at(at(14, 15, 0));
        assert_eq!(scenario.received(admin), vec!["oi"]);
    }

    #[test]
    fn test_admin_mirror_receives_volume_once() {
        let mut scenario = Scenario::standard(at(14, 1, 0));
        let admin = scenario.connect_with_roles(1, "ops", Tier::Free, &["admin"]);
        let pro_admin = scenario.connect_with_roles(2, "ops2", Tier::Pro, &["admin"]);
        let free = scenario.connect(3, "f", Tier::Free);
        scenario.ingest(volume_alert("v", "BTCUSDT", at(14, 1, 0)));

        scenario.tick_at(at(14, 15, 0));
        assert_eq!(scenario.received(admin), vec!["v"]);
        assert_eq!(scenario.received(pro_admin), vec!["v"]);
        assert_eq!(scenario.received(free), vec!["v"]);
    }

    proptest! {
        #[test]
        fn prop_open_interest_never_reaches_free(kinds in prop::collection::vec(any::<bool>(), 1..40)) {
            let mut scenario = Scenario::standard(at(14, 0, 1));
            let free = scenario.connect(1, "f", Tier::Free);
            let pro = scenario.connect(2, "p", Tier::Pro);
            let elite = scenario.connect(3, "e", Tier::Elite);

            let mut volumes = Vec::new();
            let mut all = Vec::new();
            for (i, is_volume) in kinds.iter().enumerate() {
                let id = format!("a{}", i);
                let alert = if *is_volume {
                    volumes.push(id.clone());
                    volume_alert(&id, "BTCUSDT", at(14, 0, 1))
                } else {
                    open_interest_alert(&id, "BTCUSDT", at(14, 0, 1))
                };
                all.push(id);
                scenario.ingest(alert);
            }
            prop_assert!(scenario.engine.scheduler().pending(Tier::Free).iter().all(|a| a.kind == AlertKind::Volume));

            scenario.tick_at(at(14, 15, 0));
            prop_assert_eq!(scenario.received(free), volumes);
            prop_assert_eq!(scenario.received(pro), all.clone());
            prop_assert_eq!(scenario.received(elite), all);
        }

        #[test]
        fn prop_pro_flush_iff_aligned(offset in 0i64..3600) {
            let start = at(10, 0, 0) + chrono::Duration::seconds(offset);
            let mut scenario = Scenario::standard(start);
            scenario.ingest(volume_alert("x", "BTCUSDT", start));
            let report = scenario.tick_at(start);
            let aligned = offset % 300 == 0;
            prop_assert_eq!(report.batches > 0, aligned);
        }
    }
}
