//! Tick jitter simulation
//!
//! Drives a poll-mode engine with late and skipped ticks and random alert
//! arrivals, then checks what every tier's subscriber received against
//! what the policy table says they were owed.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use alertcast_core::{AlertKind, ConnectionId, OutboundMessage, Tier};

use crate::scenario::{at, open_interest_alert, volume_alert, Scenario};

/// Lateness model for the 1-second poll tick
#[derive(Clone, Debug)]
pub struct TickJitterModel {
    /// Jitter applied to every tick (ms)
    pub base_jitter_ms: u64,
    /// Chance a tick is stalled
    pub late_probability: f64,
    /// Upper bound on a stall (ms)
    pub max_delay_ms: u64,
}

impl TickJitterModel {
    pub fn new(base_jitter_ms: u64, late_probability: f64, max_delay_ms: u64) -> Self {
        TickJitterModel {
            base_jitter_ms,
            late_probability,
            max_delay_ms,
        }
    }

    /// Every tick on the second
    pub fn none() -> Self {
        Self::new(0, 0.0, 0)
    }

    /// Sub-second jitter, rare short stalls
    pub fn mild() -> Self {
        Self::new(200, 0.02, 1_500)
    }

    /// Frequent multi-second stalls
    pub fn severe() -> Self {
        Self::new(400, 0.25, 4_000)
    }

    /// When a tick scheduled for `nominal` actually runs
    pub fn apply(&self, nominal: DateTime<Utc>, rng: &mut StdRng) -> DateTime<Utc> {
        let mut delay_ms = if self.base_jitter_ms > 0 {
            rng.gen_range(0..=self.base_jitter_ms)
        } else {
            0
        };
        if self.max_delay_ms > 0 && rng.gen_bool(self.late_probability) {
            delay_ms += rng.gen_range(1..=self.max_delay_ms);
        }
        nominal + Duration::milliseconds(delay_ms as i64)
    }
}

#[derive(Clone, Debug)]
pub struct JitterConfig {
    pub minutes: u32,
    /// Chance of an alert in any given second
    pub alert_probability: f64,
    pub jitter: TickJitterModel,
    pub seed: u64,
}

impl JitterConfig {
    pub fn quiet() -> Self {
        JitterConfig {
            minutes: 30,
            alert_probability: 0.05,
            jitter: TickJitterModel::none(),
            seed: 7,
        }
    }

    pub fn stressed() -> Self {
        JitterConfig {
            minutes: 60,
            alert_probability: 0.2,
            jitter: TickJitterModel::severe(),
            seed: 42,
        }
    }

    pub fn with_jitter(mut self, jitter: TickJitterModel) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct JitterReport {
    pub ingested: usize,
    pub ticks_run: usize,
    pub ticks_skipped: usize,
    pub missed_boundaries: usize,
    pub delivered: BTreeMap<Tier, usize>,
    pub pending: BTreeMap<Tier, usize>,
    pub violations: Vec<String>,
}

impl JitterReport {
    pub fn invariants_maintained(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Run one simulation and check delivery against the policy table
///
/// Per tier, what was delivered followed by what is still queued must equal
/// the eligible alerts in ingest order: nothing lost, duplicated or
/// reordered. Every batched delivery must carry an aligned boundary.
pub fn run_jitter_simulation(config: &JitterConfig) -> JitterReport {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let start = at(12, 0, 0);
    let mut scenario = Scenario::standard(start);
    let policy = scenario.engine.policy().clone();

    let connections: Vec<(Tier, ConnectionId)> = Tier::ALL
        .iter()
        .enumerate()
        .map(|(i, tier)| (*tier, scenario.connect(i as u64 + 1, &format!("sub-{}", tier), *tier)))
        .collect();

    let mut report = JitterReport::default();
    let mut owed: BTreeMap<Tier, Vec<String>> = BTreeMap::new();
    let mut last_tick: Option<DateTime<Utc>> = None;

    for second in 0..(config.minutes as i64 * 60) {
        let nominal = start + Duration::seconds(second);

        if rng.gen_bool(config.alert_probability) {
            let id = format!("a{}", second);
            let alert = if rng.gen_bool(0.5) {
                volume_alert(&id, "BTCUSDT", nominal)
            } else {
                open_interest_alert(&id, "ETHUSDT", nominal)
            };
            for eligible in policy.eligible_tiers(&alert.kind) {
                owed.entry(eligible.tier).or_default().push(id.clone());
            }
            scenario.set_time(nominal);
            scenario.ingest(alert);
            report.ingested += 1;
        }

        // A stalled tick swallows the ticks it overran
        let actual = config.jitter.apply(nominal, &mut rng);
        if last_tick.is_some_and(|last| actual <= last) {
            report.ticks_skipped += 1;
            continue;
        }
        last_tick = Some(actual);
        report.ticks_run += 1;
        report.missed_boundaries += scenario.tick_at(actual).missed;
    }

    for (tier, connection) in connections {
        let log = scenario.log(connection);
        let delivered = log.alert_ids();
        let pending: Vec<String> = scenario
            .engine
            .scheduler()
            .pending(tier)
            .iter()
            .map(|a| a.id.as_str().to_string())
            .collect();

        let interval = policy.get(tier).and_then(|p| p.cadence.interval());
        for message in &log.messages {
            if let OutboundMessage::AlertDelivered(delivery) = message {
                match (interval, &delivery.batch) {
                    (Some(interval), Some(batch)) if !interval.is_at_boundary(batch.boundary) => {
                        report
                            .violations
                            .push(format!("{}: batch released off-boundary at {}", tier, batch.boundary));
                    }
                    (Some(_), None) => {
                        report.violations.push(format!("{}: unbatched delivery", tier));
                    }
                    (None, Some(_)) => {
                        report.violations.push(format!("{}: immediate tier got a batch", tier));
                    }
                    _ => {}
                }
            }
        }

        let mut observed = delivered.clone();
        observed.extend(pending.iter().cloned());
        let expected = owed.remove(&tier).unwrap_or_default();
        if observed != expected {
            report.violations.push(format!(
                "{}: delivered+pending ({} + {}) does not match {} owed in order",
                tier,
                delivered.len(),
                pending.len(),
                expected.len()
            ));
        }
        let leaked = log.messages.iter().any(|m| match m {
            OutboundMessage::AlertDelivered(d) => d.kind == AlertKind::OpenInterest,
            OutboundMessage::SessionTerminated(_) => false,
        });
        if tier == Tier::Free && leaked {
            report.violations.push("free: received open interest".to_string());
        }

        report.delivered.insert(tier, delivered.len());
        report.pending.insert(tier, pending.len());
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_model_none_is_exact() {
        let mut rng = StdRng::seed_from_u64(1);
        let t = at(12, 0, 0);
        assert_eq!(TickJitterModel::none().apply(t, &mut rng), t);
    }

    #[test]
    fn test_jitter_model_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = TickJitterModel::severe();
        let t = at(12, 0, 0);
        for _ in 0..1_000 {
            let actual = model.apply(t, &mut rng);
            assert!(actual >= t);
            assert!(actual - t <= Duration::milliseconds(4_400));
        }
    }

    #[test]
    fn test_quiet_run_misses_nothing() {
        let report = run_jitter_simulation(&JitterConfig::quiet());
        assert!(report.invariants_maintained(), "{:?}", report.violations);
        assert_eq!(report.missed_boundaries, 0);
        assert_eq!(report.ticks_skipped, 0);
        assert!(report.ingested > 0);
        assert_eq!(report.delivered[&Tier::Elite], report.ingested);
    }

    #[test]
    fn test_mild_jitter_keeps_invariants() {
        let report = run_jitter_simulation(&JitterConfig::quiet().with_jitter(TickJitterModel::mild()));
        assert!(report.invariants_maintained(), "{:?}", report.violations);
        assert_eq!(report.pending[&Tier::Elite], 0);
    }

    #[test]
    fn test_stressed_run_degrades_softly() {
        for seed in [1, 2, 3] {
            let report = run_jitter_simulation(&JitterConfig::stressed().with_seed(seed));
            assert!(report.invariants_maintained(), "seed {}: {:?}", seed, report.violations);
            assert!(report.ticks_skipped > 0);
        }
    }
}
