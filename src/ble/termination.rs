//! Emits the single-byte `0x02` session-termination frame through whichever
//! transport sender is live, and drives the post-termination state transition.

use std::sync::{Arc, Mutex};

use crate::ble::fragment::Fragmenter;
use crate::ble::state_machine::{ConnectionState, ConnectionStateMachine};
use crate::error::{ErrorClass, TransportError};

/// A characteristic write/notify sink, implemented by whichever role (central or
/// peripheral) currently owns the live link.
pub trait TerminationSender: Send + Sync {
    fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError>;
}

/// Holds up to two senders — Client-side and Server-side — and drives the shared
/// [`ConnectionStateMachine`] through the post-termination transition.
///
/// Preference order when both are present: Client, falling back to Server. This
/// matters only in `DualMode` before the facade has torn down the losing endpoint.
pub struct TerminationProvider {
    client_sender: Mutex<Option<Arc<dyn TerminationSender>>>,
    server_sender: Mutex<Option<Arc<dyn TerminationSender>>>,
    state_machine: ConnectionStateMachine,
}

impl TerminationProvider {
    pub fn new(state_machine: ConnectionStateMachine) -> Self {
        Self {
            client_sender: Mutex::new(None),
            server_sender: Mutex::new(None),
            state_machine,
        }
    }

    pub fn set_client_sender(&self, sender: Arc<dyn TerminationSender>) {
        *self.client_sender.lock().unwrap() = Some(sender);
    }

    pub fn set_server_sender(&self, sender: Arc<dyn TerminationSender>) {
        *self.server_sender.lock().unwrap() = Some(sender);
    }

    /// Sends `0x02` through the preferred live sender, then advances the state
    /// machine: from `Error`, reset to `Idle`; from `Connected`/`Connecting`, walk
    /// `Disconnecting -> Disconnected`. Idempotent — a second call with no sender
    /// configured (because the first already tore it down) is a no-op, not an error.
    pub fn terminate(&self) {
        let frame = Fragmenter::terminate_frame();
        let sender = self
            .client_sender
            .lock()
            .unwrap()
            .clone()
            .or_else(|| self.server_sender.lock().unwrap().clone());
        if let Some(sender) = sender {
            let _ = sender.send_frame(&frame);
        }
        self.advance_after_termination();
    }

    fn advance_after_termination(&self) {
        match self.state_machine.get_state() {
            ConnectionState::Error { .. } => {
                self.state_machine.transition_to(ConnectionState::Idle);
            }
            ConnectionState::Connected | ConnectionState::Connecting => {
                self.state_machine
                    .transition_to(ConnectionState::Disconnecting);
                self.state_machine
                    .transition_to(ConnectionState::Disconnected);
            }
            ConnectionState::Disconnecting => {
                self.state_machine
                    .transition_to(ConnectionState::Disconnected);
            }
            _ => {}
        }
    }

    /// Classifies `error`; if terminal, sends termination and moves to `Error`.
    /// Returns whether the session was terminated as a result.
    pub fn handle_error(&self, error: &TransportError) -> bool {
        let class = self.state_machine.handle_error(error);
        if class == ErrorClass::Terminal {
            self.terminate();
            true
        } else {
            false
        }
    }

    /// Forces termination for `error` regardless of its classification. Used once a
    /// recoverable error's retry budget is exhausted: the classifier still calls it
    /// recoverable, but this endpoint has no more attempts left to give it.
    pub fn force_terminal(&self, error: &TransportError) {
        self.state_machine.transition_to(ConnectionState::Error {
            reason: Some(error.to_string()),
        });
        self.terminate();
    }
}
