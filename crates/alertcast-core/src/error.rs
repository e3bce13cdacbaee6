//! Error types for Alertcast

use thiserror::Error;

use crate::ConnectionId;

/// Core Alertcast errors
///
/// Expected distribution conditions (empty rooms, empty queues, unknown
/// alert kinds) are not errors and never show up here.
#[derive(Error, Debug)]
pub enum AlertcastError {
    // Transport errors
    #[error("Connection closed: {0}")]
    ConnectionClosed(ConnectionId),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    #[error("Transport error: {0}")]
    TransportError(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown tier: {0}")]
    UnknownTier(String),

    #[error("Unknown kill reason: {0}")]
    UnknownKillReason(String),

    #[error("Invalid cadence interval: {0} minutes")]
    InvalidInterval(u32),

    // Decoding errors
    #[error("Decode error: {0}")]
    Decode(String),

    // Engine errors
    #[error("Distribution engine stopped")]
    EngineStopped,
}

/// Result type for Alertcast operations
pub type AlertcastResult<T> = Result<T, AlertcastError>;
