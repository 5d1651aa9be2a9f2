//! Runtime configuration for the presentation transport.
//!
//! Every field here corresponds to a knob named in the proximity core's external
//! interfaces; defaults reproduce the values called out next to each timeout and
//! limit in the component design.

/// L2CAP connection-oriented-channel upgrade policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, uniffi::Enum)]
pub enum L2capPolicy {
    /// Try L2CAP when the peer advertises a PSM; fall back to GATT on first-message failure.
    #[default]
    Auto,
    /// Require L2CAP; fail the session if the channel cannot be opened.
    Force,
    /// Never attempt L2CAP, always use GATT notify/write framing.
    Disable,
}

/// Transport configuration, shared by [`crate::ble::central::CentralClient`],
/// [`crate::ble::peripheral::PeripheralServer`], and the
/// [`crate::ble::facade::TransportFacade`] that owns them.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct Configuration {
    /// Overall timeout for establishing a connection, in milliseconds.
    pub connection_timeout_ms: u64,
    /// Maximum silence between frames before the link is considered dead, in milliseconds.
    pub idle_timeout_ms: u64,
    /// Timeout for a single `send` completing, in milliseconds.
    pub send_timeout_ms: u64,
    /// Timeout for BLE scanning before giving up, in milliseconds.
    pub scan_timeout_ms: u64,
    /// Maximum application-message size accepted by the fragmenter's reassembly buffer.
    pub max_message_bytes: u64,
    /// Maximum retry attempts for a recoverable transport error.
    pub retries: u32,
    /// L2CAP upgrade policy.
    pub use_l2cap: L2capPolicy,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 30_000,
            idle_timeout_ms: 20_000,
            send_timeout_ms: 10_000,
            scan_timeout_ms: 60_000,
            max_message_bytes: 512 * 1024,
            retries: 3,
            use_l2cap: L2capPolicy::Auto,
        }
    }
}

#[uniffi::export]
impl Configuration {
    #[uniffi::constructor]
    /// Construct a [`Configuration`] with every field set to the core's documented defaults.
    pub fn new_default() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Configuration::default();
        assert_eq!(cfg.connection_timeout_ms, 30_000);
        assert_eq!(cfg.idle_timeout_ms, 20_000);
        assert_eq!(cfg.send_timeout_ms, 10_000);
        assert_eq!(cfg.scan_timeout_ms, 60_000);
        assert_eq!(cfg.max_message_bytes, 512 * 1024);
        assert_eq!(cfg.retries, 3);
        assert_eq!(cfg.use_l2cap, L2capPolicy::Auto);
    }
}
