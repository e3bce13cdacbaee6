//! Alert classifier
//!
//! Decides, per alert, which tiers may see it and how: immediately or via
//! the tier's pending queue. Tiers whose policy excludes the kind are left
//! out entirely.

use alertcast_core::{Alert, Role, Tier};

use crate::{CadenceScheduler, TierPolicyTable};

/// Where an alert goes
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    /// Tiers to deliver to now
    pub immediate_targets: Vec<Tier>,
    /// Tiers the alert was queued for
    pub queued_targets: Vec<Tier>,
    /// Operational roles mirrored immediately
    pub mirror_roles: Vec<Role>,
}

impl Classification {
    /// No tier may see this alert
    pub fn is_excluded(&self) -> bool {
        self.immediate_targets.is_empty() && self.queued_targets.is_empty()
    }
}

/// Classifies alerts against the tier policy table
pub struct AlertClassifier {
    policy: TierPolicyTable,
    mirror_roles: Vec<Role>,
}

impl AlertClassifier {
    pub fn new(policy: TierPolicyTable, mirror_roles: Vec<Role>) -> Self {
        AlertClassifier { policy, mirror_roles }
    }

    pub fn policy(&self) -> &TierPolicyTable {
        &self.policy
    }

    pub fn mirror_roles(&self) -> &[Role] {
        &self.mirror_roles
    }

    /// Classify `alert`, enqueuing it on every eligible interval tier
    pub fn classify(&self, alert: &Alert, scheduler: &mut CadenceScheduler) -> Classification {
        let mut out = Classification::default();

        for policy in self.policy.eligible_tiers(&alert.kind) {
            if policy.cadence.is_immediate() {
                out.immediate_targets.push(policy.tier);
            } else if scheduler.enqueue(policy.tier, alert.clone()) {
                out.queued_targets.push(policy.tier);
            }
        }

        if out.is_excluded() {
            tracing::debug!(
                alert_id = %alert.id,
                kind = %alert.kind,
                "classifier.classify: no eligible tier"
            );
            return out;
        }

        out.mirror_roles = self.mirror_roles.clone();
        tracing::debug!(
            alert_id = %alert.id,
            kind = %alert.kind,
            immediate = ?out.immediate_targets,
            queued = ?out.queued_targets,
            "classifier.classify"
        );
        out
    }
}
