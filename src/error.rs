//! Error types for the telemetry client.

use crate::types::ConnectionState;
use thiserror::Error;

/// Result type alias for telemetry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the telemetry client and its loops.
///
/// Each variant maps to one recovery policy: sensor faults skip a cycle,
/// connection-class faults lead to an explicit reconnect, handler faults are
/// logged and dropped.
#[derive(Error, Debug)]
pub enum Error {
    /// The sensor could not produce a usable sample this cycle.
    #[error("Sensor sample failed: {0}")]
    TransientFault(String),

    /// Joining the network or connecting to the broker failed.
    #[error("Failed to connect: {0}")]
    ConnectFault(String),

    /// A live session failed in the middle of an operation.
    #[error("Transport failed during {operation}: {details}")]
    TransportFault {
        /// The operation that failed
        operation: &'static str,
        /// Additional details about the failure
        details: String,
    },

    /// An operation was attempted while the connection was not established.
    #[error("Cannot {operation} while {state}")]
    NotConnected {
        /// The operation that was rejected
        operation: &'static str,
        /// The connection state at the time of the call
        state: ConnectionState,
    },

    /// A message handler returned an error or panicked.
    #[error("Handler for '{topic}' failed: {details}")]
    HandlerFault {
        /// Topic of the message being dispatched
        topic: String,
        /// Error text or panic message
        details: String,
    },

    /// The broker refused a subscription filter. The session stays usable.
    #[error("Broker rejected subscription '{0}'")]
    SubscriptionRejected(String),

    /// Topic name or filter is malformed.
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Configuration values are inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Payload encoding or decoding failed.
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// Configuration could not be loaded.
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Returns true for faults that are recovered by reconnecting.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Error::ConnectFault(_) | Error::TransportFault { .. } | Error::NotConnected { .. }
        )
    }

    pub(crate) fn transport(operation: &'static str, details: impl ToString) -> Self {
        Error::TransportFault {
            operation,
            details: details.to_string(),
        }
    }
}
