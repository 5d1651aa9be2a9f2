//! Shared error taxonomy for the BLE transport and connection state machine.
//!
//! The classifier in [`TransportError::classify`] is the single authority the
//! [`crate::ble::state_machine::ConnectionStateMachine`] consults to decide between
//! retrying an operation and invoking the termination callback.

use crate::ble::fragment::FrameError;

/// Partition of a [`TransportError`] used by the connection state machine's retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum ErrorClass {
    /// Invokes the termination callback; the endpoint cannot recover.
    Terminal,
    /// Retried within the state machine's retry budget.
    Recoverable,
}

/// Errors produced by the BLE transport layer (central, peripheral, and the
/// fragmenter/state machine they share).
#[derive(Debug, Clone, thiserror::Error, uniffi::Error)]
pub enum TransportError {
    #[error("bluetooth adapter is unavailable")]
    BluetoothUnavailable,
    #[error("bluetooth permission was not granted")]
    BluetoothUnauthorized,
    #[error("characteristic discovery failed after {attempts} attempts")]
    DiscoveryFailed { attempts: u32 },
    #[error("write to {characteristic} failed: {reason}")]
    WriteFailed {
        characteristic: String,
        reason: String,
    },
    #[error("notification on {characteristic} failed: {reason}")]
    NotifyFailed {
        characteristic: String,
        reason: String,
    },
    #[error("peer disconnected before the session reached Connected")]
    PrematureDisconnect,
    #[error("operation timed out")]
    Timeout,
    #[error("{0}")]
    Frame(#[from] FrameError),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

impl TransportError {
    /// Partitions this error per the taxonomy in the core's error handling design:
    /// authorization/adapter/discovery/overflow/protocol errors are terminal,
    /// individual write/notify failures and pre-`Connected` disconnects are
    /// recoverable within the retry budget.
    pub fn classify(&self) -> ErrorClass {
        use TransportError::*;
        match self {
            BluetoothUnavailable
            | BluetoothUnauthorized
            | DiscoveryFailed { .. }
            | Frame(_)
            | ProtocolViolation(_)
            | Timeout => ErrorClass::Terminal,
            WriteFailed { .. } | NotifyFailed { .. } | PrematureDisconnect => {
                ErrorClass::Recoverable
            }
        }
    }
}
