//! Engine statistics

use serde::Serialize;

/// Counters kept by the distribution engine
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub alerts_ingested: u64,
    /// Alerts no tier may receive (unknown kind)
    pub alerts_unclassified: u64,
    /// Room deliveries made without queuing (tier and mirror rooms)
    pub immediate_deliveries: u64,
    /// Queue insertions, one per (alert, tier)
    pub queued: u64,
    /// Non-empty batches released
    pub flushes: u64,
    pub flushed_alerts: u64,
    pub missed_boundaries: u64,
    pub delivery_failures: u64,
    pub kills: u64,
    pub connections_closed: u64,
    pub dropped_on_shutdown: u64,
}
