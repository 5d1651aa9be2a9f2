//! Canonical connection state and transition authority, shared by the central and
//! peripheral endpoints.
//!
//! Each endpoint owns exactly one [`ConnectionStateMachine`]; in `DualMode` a process
//! holds two independent instances. All mutation goes through [`transition_to`], which
//! never panics and never blocks on I/O — it only records state and, on first entry to
//! `Error`, invokes the termination callback.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ErrorClass, TransportError};

/// Connection lifecycle state. `Error` carries an optional human-readable reason; the
/// UI layer renders it, the core never interprets the string.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Error { reason: Option<String> },
}

/// Retry policy for recoverable transport errors: exponential backoff with full
/// jitter, base 100 ms, cap 2 s, 3 attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(2),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the backoff window before an attempt (attempts are 0-indexed);
    /// callers apply their own jitter within `[0, bound)`.
    pub fn backoff_bound(&self, attempt: u32) -> Duration {
        let scaled = self.base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        scaled.min(self.cap)
    }
}

type TerminationCallback = Box<dyn Fn(&str) + Send + Sync>;

struct Inner {
    state: ConnectionState,
    termination_fired: bool,
    callback: Option<TerminationCallback>,
}

/// Single-owner, mutex-serialized state machine. Cheap to clone (shares the inner
/// mutex via `Arc`) so both the transport endpoint and the facade can hold a handle.
#[derive(Clone)]
pub struct ConnectionStateMachine {
    inner: Arc<Mutex<Inner>>,
    retry_policy: RetryPolicy,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self::with_retry_policy(RetryPolicy::default())
    }

    pub fn with_retry_policy(retry_policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ConnectionState::Idle,
                termination_fired: false,
                callback: None,
            })),
            retry_policy,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Registers the callback invoked exactly once on first entry to `Error`.
    pub fn set_termination_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.lock().unwrap().callback = Some(Box::new(callback));
    }

    pub fn get_state(&self) -> ConnectionState {
        self.inner.lock().unwrap().state.clone()
    }

    pub fn is_in_state(&self, state: &ConnectionState) -> bool {
        &self.inner.lock().unwrap().state == state
    }

    /// Attempts a transition. Returns `false` and leaves state untouched for any
    /// transition not in the legal set; never panics.
    pub fn transition_to(&self, target: ConnectionState) -> bool {
        let mut guard = self.inner.lock().unwrap();
        if !Self::is_legal(&guard.state, &target) {
            return false;
        }
        let entering_error = matches!(target, ConnectionState::Error { .. });
        let reason = match &target {
            ConnectionState::Error { reason } => reason.clone(),
            _ => None,
        };
        guard.state = target;
        if entering_error && !guard.termination_fired {
            guard.termination_fired = true;
            if let Some(cb) = guard.callback.as_ref() {
                cb(reason.as_deref().unwrap_or("unspecified"));
            }
        }
        if !entering_error {
            guard.termination_fired = false;
        }
        true
    }

    /// Runs this error through the classifier and drives the appropriate transition:
    /// `Terminal` moves to `Error`, `Recoverable` leaves state untouched (the caller is
    /// expected to retry per [`RetryPolicy`]).
    pub fn handle_error(&self, error: &TransportError) -> ErrorClass {
        let class = error.classify();
        if class == ErrorClass::Terminal {
            self.transition_to(ConnectionState::Error {
                reason: Some(error.to_string()),
            });
        }
        class
    }

    fn is_legal(from: &ConnectionState, to: &ConnectionState) -> bool {
        use ConnectionState::*;
        match (from, to) {
            (Idle, Scanning) => true,
            (Scanning, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, Disconnecting) => true,
            (Disconnecting, Disconnected) => true,
            (Disconnected, Idle) => true,
            (Connected, Disconnected) => true,
            (Scanning, Error { .. })
            | (Connecting, Error { .. })
            | (Connected, Error { .. })
            | (Disconnecting, Error { .. }) => true,
            (Error { .. }, Idle) => true,
            _ => false,
        }
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
