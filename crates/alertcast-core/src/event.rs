//! Event definitions
//!
//! Inbound events are produced by the detection pipeline, the session
//! layer and account moderation. Outbound messages are what the transport
//! pushes to subscribers. Both use the dotted event names the UI listens
//! for (`alert.delivered`, `session.terminated`, ...).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Alert, AlertId, AlertKind, AlertcastError, AlertcastResult, ConnectionId, Subscription, SubscriberId};

pub const ALERT_DELIVERED: &str = "alert.delivered";
pub const SESSION_TERMINATED: &str = "session.terminated";

/// Why an account lost access
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KillReason {
    Deleted,
    Banned,
    Suspended,
}

impl KillReason {
    pub fn as_str(self) -> &'static str {
        match self {
            KillReason::Deleted => "deleted",
            KillReason::Banned => "banned",
            KillReason::Suspended => "suspended",
        }
    }

    /// Notice shown to the subscriber when moderation supplied none
    pub fn default_message(self) -> &'static str {
        match self {
            KillReason::Deleted => "Your account has been deleted.",
            KillReason::Banned => "Your account has been banned.",
            KillReason::Suspended => "Your account has been suspended.",
        }
    }
}

impl fmt::Display for KillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KillReason {
    type Err = AlertcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deleted" => Ok(KillReason::Deleted),
            "banned" => Ok(KillReason::Banned),
            "suspended" => Ok(KillReason::Suspended),
            _ => Err(AlertcastError::UnknownKillReason(s.to_string())),
        }
    }
}

/// Forced session termination, consumed once by the preemption channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KillEvent {
    pub subscriber_id: SubscriberId,
    pub reason: KillReason,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl KillEvent {
    pub fn new(subscriber_id: SubscriberId, reason: KillReason, timestamp: DateTime<Utc>) -> Self {
        KillEvent {
            subscriber_id,
            reason,
            timestamp,
            message: reason.default_message().to_string(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// The `session.terminated` notice for this kill
    pub fn notice(&self) -> OutboundMessage {
        OutboundMessage::SessionTerminated(SessionTermination {
            reason: self.reason,
            timestamp: self.timestamp,
            message: self.message.clone(),
        })
    }
}

/// Position of a delivery inside a flushed batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchInfo {
    /// Wall-clock boundary that released the batch
    pub boundary: DateTime<Utc>,
    /// Start of the cadence window the batch covers
    pub window_start: DateTime<Utc>,
    /// Zero-based position in the batch
    pub position: usize,
    pub size: usize,
}

/// Payload of `alert.delivered`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDelivery {
    pub alert_id: AlertId,
    pub kind: AlertKind,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchInfo>,
}

impl AlertDelivery {
    pub fn immediate(alert: &Alert) -> Self {
        AlertDelivery {
            alert_id: alert.id.clone(),
            kind: alert.kind.clone(),
            payload: alert.payload.clone(),
            detection_time: alert.detection_time,
            batch: None,
        }
    }

    pub fn batched(alert: &Alert, batch: BatchInfo) -> Self {
        AlertDelivery {
            batch: Some(batch),
            ..Self::immediate(alert)
        }
    }
}

/// Payload of `session.terminated`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTermination {
    pub reason: KillReason,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Message handed to the transport for a room or a single connection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum OutboundMessage {
    #[serde(rename = "alert.delivered")]
    AlertDelivered(AlertDelivery),
    #[serde(rename = "session.terminated")]
    SessionTerminated(SessionTermination),
}

impl OutboundMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundMessage::AlertDelivered(_) => ALERT_DELIVERED,
            OutboundMessage::SessionTerminated(_) => SESSION_TERMINATED,
        }
    }

    pub fn to_json(&self) -> AlertcastResult<String> {
        serde_json::to_string(self).map_err(|e| AlertcastError::Decode(e.to_string()))
    }
}

/// Event consumed by the distribution engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum InboundEvent {
    #[serde(rename = "alert.detected")]
    AlertDetected(Alert),
    #[serde(rename = "subscriber.connected")]
    SubscriberConnected(Subscription),
    #[serde(rename = "subscriber.disconnected", rename_all = "camelCase")]
    SubscriberDisconnected { connection_id: ConnectionId },
    #[serde(rename = "account.terminated", rename_all = "camelCase")]
    AccountTerminated {
        subscriber_id: SubscriberId,
        reason: KillReason,
        #[serde(default)]
        message: Option<String>,
    },
}

impl InboundEvent {
    pub fn from_json(raw: &str) -> AlertcastResult<Self> {
        serde_json::from_str(raw).map_err(|e| AlertcastError::Decode(e.to_string()))
    }
}
