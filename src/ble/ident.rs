//! BLE identifier derivation and constant-time comparison.
//!
//! The central uses the ident to pick the right peripheral out of several
//! matching-service advertisements; the peripheral exposes it on the Ident
//! characteristic so the central can verify it reached the right device before
//! trusting anything else over the link.

use subtle::ConstantTimeEq;

/// A 16-byte BLE session identifier, derived deterministically from the device
/// engagement's session transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ident(pub [u8; 16]);

impl Ident {
    /// Wraps a 16-byte ident. Returns `None` if `bytes` is not exactly 16 bytes long,
    /// matching the BLE Ident characteristic's fixed-width contract.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Constant-time equality; identifiers pass over the air and timing leaks on
    /// their comparison can let a passive observer narrow down a session transcript.
    pub fn constant_time_eq(&self, other: &Ident) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl AsRef<[u8]> for Ident {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
