//! Tier policy table
//!
//! Static mapping from tier to cadence and to the alert kinds the tier may
//! ever receive. Built once from configuration; never mutated afterwards.

use std::collections::{BTreeMap, HashSet};

use alertcast_core::{AlertKind, AlertcastError, AlertcastResult, Tier};
use alertcast_time::{Cadence, Interval};

use crate::TierPolicyConfig;

/// Policy of a single tier
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TierPolicy {
    pub tier: Tier,
    pub cadence: Cadence,
    pub allowed_kinds: HashSet<AlertKind>,
}

impl TierPolicy {
    #[inline]
    pub fn allows(&self, kind: &AlertKind) -> bool {
        self.allowed_kinds.contains(kind)
    }
}

/// Policy table covering every tier
#[derive(Clone, Debug)]
pub struct TierPolicyTable {
    policies: BTreeMap<Tier, TierPolicy>,
}

impl TierPolicyTable {
    /// Free 15m volume, Pro 5m volume + open interest, Elite immediate
    pub fn standard() -> Self {
        let policies = crate::standard_tiers()
            .into_iter()
            .map(|row| (row.tier, policy_from_row(row)))
            .collect();
        TierPolicyTable { policies }
    }

    pub fn from_config(rows: &[TierPolicyConfig]) -> AlertcastResult<Self> {
        let mut policies = BTreeMap::new();
        for row in rows {
            if policies.insert(row.tier, policy_from_row(row.clone())).is_some() {
                return Err(AlertcastError::InvalidConfig(format!(
                    "tier '{}' configured twice",
                    row.tier
                )));
            }
        }
        if let Some(missing) = Tier::ALL.iter().find(|t| !policies.contains_key(*t)) {
            return Err(AlertcastError::InvalidConfig(format!(
                "tier '{}' missing from policy table",
                missing
            )));
        }
        Ok(TierPolicyTable { policies })
    }

    pub fn get(&self, tier: Tier) -> Option<&TierPolicy> {
        self.policies.get(&tier)
    }

    /// All policies, lowest tier first
    pub fn iter(&self) -> impl Iterator<Item = &TierPolicy> {
        self.policies.values()
    }

    /// Tiers that may receive `kind`, lowest tier first
    pub fn eligible_tiers<'a>(&'a self, kind: &'a AlertKind) -> impl Iterator<Item = &'a TierPolicy> + 'a {
        self.policies.values().filter(move |p| p.allows(kind))
    }

    /// Interval-cadence tiers and their intervals
    pub fn interval_tiers(&self) -> impl Iterator<Item = (Tier, Interval)> + '_ {
        self.policies
            .values()
            .filter_map(|p| p.cadence.interval().map(|i| (p.tier, i)))
    }
}

impl Default for TierPolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn policy_from_row(row: TierPolicyConfig) -> TierPolicy {
    TierPolicy {
        tier: row.tier,
        cadence: row.cadence,
        allowed_kinds: row.allowed_kinds.into_iter().collect(),
    }
}
