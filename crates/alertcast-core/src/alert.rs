//! Alert definitions
//!
//! An alert is an immutable fact about a market event produced by the
//! detection pipeline. The distribution engine reads only its identity,
//! kind and timing; the payload passes through untouched.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AlertId, AlertcastError, AlertcastResult};

/// Alert kind
///
/// The set is open: kinds this build does not know are kept as `Other`
/// and classify only where a tier lists them. All kinds are normalized to
/// upper case with `_` separators, so `funding-rate` and `FUNDING_RATE`
/// are the same kind.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlertKind {
    /// Hourly quote-volume spike
    Volume,
    /// Open-interest spike
    OpenInterest,
    Other(String),
}

impl AlertKind {
    pub fn parse(s: &str) -> Self {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "VOLUME" => AlertKind::Volume,
            "OPEN_INTEREST" | "OI" => AlertKind::OpenInterest,
            _ => AlertKind::Other(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AlertKind::Volume => "VOLUME",
            AlertKind::OpenInterest => "OPEN_INTEREST",
            AlertKind::Other(s) => s,
        }
    }

    /// Is this one of the kinds this build knows how to route?
    pub fn is_known(&self) -> bool {
        !matches!(self, AlertKind::Other(_))
    }
}

impl From<String> for AlertKind {
    fn from(s: String) -> Self {
        AlertKind::parse(&s)
    }
}

impl From<AlertKind> for String {
    fn from(kind: AlertKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Debug for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert record as handed over by the detection pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: AlertId,
    pub kind: AlertKind,
    /// When the upstream pipeline detected the condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_time: Option<DateTime<Utc>>,
    /// When the record was produced
    pub timestamp: DateTime<Utc>,
    /// Kind-specific metrics, opaque to distribution
    #[serde(default)]
    pub payload: Value,
}

impl Alert {
    pub fn new(id: impl Into<AlertId>, kind: AlertKind, timestamp: DateTime<Utc>, payload: Value) -> Self {
        Alert {
            id: id.into(),
            kind,
            detection_time: None,
            timestamp,
            payload,
        }
    }

    pub fn with_detection_time(mut self, detection_time: DateTime<Utc>) -> Self {
        self.detection_time = Some(detection_time);
        self
    }

    /// Time that is authoritative for cadence alignment
    #[inline]
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.detection_time.unwrap_or(self.timestamp)
    }

    /// Market symbol from the payload, if present
    pub fn symbol(&self) -> Option<&str> {
        self.payload.get("symbol").and_then(Value::as_str)
    }

    /// Decode an alert record from pipeline JSON
    pub fn from_json(raw: &str) -> AlertcastResult<Self> {
        serde_json::from_str(raw).map_err(|e| AlertcastError::Decode(e.to_string()))
    }
}
