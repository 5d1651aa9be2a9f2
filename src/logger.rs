//! Structured logging bootstrap for foreign callers.
//!
//! Native apps call [`init_logger`] once at startup; everything else in the crate
//! logs through `tracing` and relies on whatever subscriber this installs.

/// Installs a `tracing-subscriber` formatter writing to stderr. Safe to call more
/// than once — later calls are no-ops, since a subscriber is already installed.
#[uniffi::export]
pub fn init_logger() {
    let _ = tracing_subscriber::fmt::try_init();
}
