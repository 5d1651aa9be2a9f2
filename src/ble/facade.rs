//! Chooses role(s) per [`PresentationMode`] and wires the BLE endpoints to whatever
//! consumes reassembled application messages, without the endpoints ever reaching
//! back into that consumer themselves (they only call the closures the facade hands
//! them, per the cyclic-reference note in the design).

use std::sync::{Arc, Mutex};

use crate::ble::central::{BleCentralDelegate, CentralClient};
use crate::ble::gatt::GattProfile;
use crate::ble::ident::Ident;
use crate::ble::peripheral::{BlePeripheralDelegate, PeripheralServer};
use crate::ble::state_machine::{ConnectionStateMachine, RetryPolicy};
use crate::config::Configuration;
use crate::error::TransportError;

/// How the holder exposes device engagement. Default is `DualMode` for QR, and
/// `CentralOnly` for NFC; `DualMode` rejects an NFC-derived engagement outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum PresentationMode {
    CentralOnly,
    PeripheralOnly,
    DualMode,
}

/// The carrier an engagement derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementOrigin {
    Qr,
    Nfc,
}

impl PresentationMode {
    pub fn default_for(origin: EngagementOrigin) -> Self {
        match origin {
            EngagementOrigin::Qr => PresentationMode::DualMode,
            EngagementOrigin::Nfc => PresentationMode::CentralOnly,
        }
    }

    /// `DualMode` is incompatible with an NFC-derived engagement; everything else is
    /// permitted. See end-to-end scenario 6 in the design's testable properties.
    pub fn validate_for(self, origin: EngagementOrigin) -> Result<(), TransportError> {
        if self == PresentationMode::DualMode && origin == EngagementOrigin::Nfc {
            Err(TransportError::ProtocolViolation(
                "InvalidMode: DualMode is incompatible with an NFC-derived engagement".into(),
            ))
        } else {
            Ok(())
        }
    }
}

enum Endpoint {
    Central(Arc<CentralClient>),
    Peripheral(Arc<PeripheralServer>),
}

impl Endpoint {
    fn state_machine(&self) -> &ConnectionStateMachine {
        match self {
            Endpoint::Central(c) => c.state_machine(),
            Endpoint::Peripheral(p) => p.state_machine(),
        }
    }

    async fn terminate(&self) -> Result<(), TransportError> {
        match self {
            Endpoint::Central(c) => c.terminate().await,
            Endpoint::Peripheral(p) => p.terminate().await,
        }
    }
}

/// Owns one or two BLE endpoints per [`PresentationMode`] and arbitrates which one's
/// first message wins when both are live (`DualMode`).
pub struct TransportFacade {
    mode: PresentationMode,
    central: Option<Arc<CentralClient>>,
    peripheral: Option<Arc<PeripheralServer>>,
    mode_lock: Mutex<Option<&'static str>>,
}

impl TransportFacade {
    /// Builds a facade for `mode`, constructing only the endpoints that mode needs.
    /// `central_delegate`/`peripheral_delegate` may be `None` when the corresponding
    /// role is not part of `mode`. `config.retries` seeds both endpoints'
    /// [`RetryPolicy::max_attempts`]; every other field is threaded straight through.
    pub fn new(
        mode: PresentationMode,
        profile: GattProfile,
        central_delegate: Option<Arc<dyn BleCentralDelegate>>,
        peripheral_delegate: Option<Arc<dyn BlePeripheralDelegate>>,
        config: Configuration,
    ) -> Arc<Self> {
        let retry_policy = RetryPolicy {
            max_attempts: config.retries,
            ..RetryPolicy::default()
        };
        let central = if matches!(mode, PresentationMode::CentralOnly | PresentationMode::DualMode) {
            central_delegate.map(|d| {
                CentralClient::new(
                    profile,
                    d,
                    ConnectionStateMachine::with_retry_policy(retry_policy),
                    config.clone(),
                )
            })
        } else {
            None
        };
        let peripheral = if matches!(mode, PresentationMode::PeripheralOnly | PresentationMode::DualMode) {
            peripheral_delegate.map(|d| {
                PeripheralServer::new(
                    profile,
                    d,
                    ConnectionStateMachine::with_retry_policy(retry_policy),
                    config.clone(),
                )
            })
        } else {
            None
        };
        Arc::new(Self {
            mode,
            central,
            peripheral,
            mode_lock: Mutex::new(None),
        })
    }

    pub fn mode(&self) -> PresentationMode {
        self.mode
    }

    pub fn central(&self) -> Option<&Arc<CentralClient>> {
        self.central.as_ref()
    }

    pub fn peripheral(&self) -> Option<&Arc<PeripheralServer>> {
        self.peripheral.as_ref()
    }

    /// Wires both endpoints' `on_received` to the mode-election race and forwards the
    /// winner's message to `dispatch`. Must be called once before `start`.
    pub fn wire_dispatch<F>(self: &Arc<Self>, dispatch: F)
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        let dispatch = Arc::new(dispatch);

        if let Some(central) = &self.central {
            let facade = self.clone();
            let dispatch = dispatch.clone();
            central.on_received(move |message| facade.on_endpoint_message("central", message, &dispatch));
        }
        if let Some(peripheral) = &self.peripheral {
            let facade = self.clone();
            let dispatch = dispatch.clone();
            peripheral.on_received(move |message| facade.on_endpoint_message("peripheral", message, &dispatch));
        }
    }

    fn on_endpoint_message(
        &self,
        endpoint_name: &'static str,
        message: Vec<u8>,
        dispatch: &Arc<dyn Fn(Vec<u8>) + Send + Sync>,
    ) {
        let mut winner = self.mode_lock.lock().unwrap();
        if winner.is_some() {
            // A winner was already elected (possibly by the other endpoint, possibly
            // by this one on a prior message); everything after the first is dropped.
            return;
        }
        *winner = Some(endpoint_name);
        drop(winner);

        let loser = match endpoint_name {
            "central" => self.peripheral.clone().map(Endpoint::Peripheral),
            _ => self.central.clone().map(Endpoint::Central),
        };
        if let Some(loser) = loser {
            let runtime = tokio::runtime::Handle::current();
            tokio::task::block_in_place(|| {
                runtime.block_on(async {
                    let _ = loser.terminate().await;
                });
            });
        }
        dispatch(message);
    }

    /// Starts whichever endpoint(s) this mode requires. Each endpoint sources its own
    /// timeouts from the `Configuration` it was built with.
    pub async fn start(self: &Arc<Self>, ident: Ident) -> Result<(), TransportError> {
        if let Some(peripheral) = &self.peripheral {
            peripheral.start(ident.to_vec()).await?;
        }
        if let Some(central) = &self.central {
            central.start(ident).await?;
        }
        Ok(())
    }

    /// Sends through the winning endpoint (or the single configured endpoint outside
    /// `DualMode`).
    pub async fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        let winner = *self.mode_lock.lock().unwrap();
        match winner {
            Some("central") => self.central.as_ref().unwrap().send(message).await,
            Some("peripheral") => self.peripheral.as_ref().unwrap().send(message).await,
            _ => match self.mode {
                PresentationMode::CentralOnly => self.central.as_ref().unwrap().send(message).await,
                PresentationMode::PeripheralOnly => self.peripheral.as_ref().unwrap().send(message).await,
                PresentationMode::DualMode => Err(TransportError::ProtocolViolation(
                    "no endpoint has won the DualMode race yet".into(),
                )),
            },
        }
    }

    pub async fn terminate(&self) -> Result<(), TransportError> {
        if let Some(central) = &self.central {
            central.terminate().await?;
        }
        if let Some(peripheral) = &self.peripheral {
            peripheral.terminate().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_for_qr_is_dual_and_nfc_is_central_only() {
        assert_eq!(
            PresentationMode::default_for(EngagementOrigin::Qr),
            PresentationMode::DualMode
        );
        assert_eq!(
            PresentationMode::default_for(EngagementOrigin::Nfc),
            PresentationMode::CentralOnly
        );
    }

    #[test]
    fn dual_mode_rejects_nfc_engagement() {
        let result = PresentationMode::DualMode.validate_for(EngagementOrigin::Nfc);
        assert!(result.is_err());
    }

    #[test]
    fn dual_mode_accepts_qr_engagement() {
        assert!(PresentationMode::DualMode
            .validate_for(EngagementOrigin::Qr)
            .is_ok());
    }

    #[test]
    fn central_only_accepts_nfc_engagement() {
        assert!(PresentationMode::CentralOnly
            .validate_for(EngagementOrigin::Nfc)
            .is_ok());
    }
}
