//! Holder-Central / Reader-Central GATT client role — the mirror of
//! [`crate::ble::peripheral::PeripheralServer`].

use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::ble::fragment::{Accepted, Fragmenter};
use crate::ble::gatt::{GattProfile, STATE_END, STATE_START};
use crate::ble::ident::Ident;
use crate::ble::retry::{retry_or_terminate, with_timeout};
use crate::ble::state_machine::{ConnectionState, ConnectionStateMachine};
use crate::ble::termination::{TerminationProvider, TerminationSender};
use crate::config::{Configuration, L2capPolicy};
use crate::error::TransportError;

/// One scan result: a peripheral advertising a matching service UUID, together with
/// whatever the platform could already read off its Ident characteristic.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub peripheral_id: String,
    pub ident: Option<Vec<u8>>,
}

/// Radio collaborator for the central role.
#[uniffi::export(with_foreign)]
#[async_trait]
pub trait BleCentralDelegate: Send + Sync + Debug {
    /// Scans for `service_uuid`; the platform reports matches via `on_scan_result`
    /// calls on [`CentralClient`] as they arrive, then this call resolves once a
    /// peripheral has been chosen (or the scan timeout elapses).
    async fn scan(&self, service_uuid: String, timeout_ms: u64) -> Result<ScanResult, TransportError>;

    async fn connect(&self, peripheral_id: String) -> Result<(), TransportError>;

    async fn discover_characteristics(&self, peripheral_id: String) -> Result<(), TransportError>;

    async fn read_characteristic(
        &self,
        peripheral_id: String,
        characteristic: String,
    ) -> Result<Vec<u8>, TransportError>;

    async fn write_characteristic(
        &self,
        peripheral_id: String,
        characteristic: String,
        payload: Vec<u8>,
        with_response: bool,
    ) -> Result<(), TransportError>;

    async fn subscribe(&self, peripheral_id: String, characteristic: String) -> Result<(), TransportError>;

    async fn disconnect(&self, peripheral_id: String) -> Result<(), TransportError>;

    /// Opens an L2CAP connection-oriented channel to `psm` on the already-connected
    /// peripheral. Only called when [`crate::config::L2capPolicy`] allows it and the
    /// peripheral advertised a PSM.
    async fn open_l2cap_channel(&self, peripheral_id: String, psm: u16) -> Result<(), TransportError>;

    /// Sends an unfragmented application message on the already-open L2CAP channel.
    async fn l2cap_write(&self, peripheral_id: String, payload: Vec<u8>) -> Result<(), TransportError>;

    async fn close_l2cap_channel(&self, peripheral_id: String) -> Result<(), TransportError>;
}

struct SenderAdapter {
    delegate: Arc<dyn BleCentralDelegate>,
    peripheral_id: String,
    runtime: tokio::runtime::Handle,
}

impl TerminationSender for SenderAdapter {
    fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        let delegate = self.delegate.clone();
        let peripheral_id = self.peripheral_id.clone();
        let frame = frame.to_vec();
        tokio::task::block_in_place(|| {
            self.runtime.block_on(delegate.write_characteristic(
                peripheral_id,
                "client2server".to_string(),
                frame,
                true,
            ))
        })
    }
}

/// Holder-Central / Reader-Central endpoint.
pub struct CentralClient {
    profile: GattProfile,
    delegate: Arc<dyn BleCentralDelegate>,
    state_machine: ConnectionStateMachine,
    termination: Arc<TerminationProvider>,
    config: Configuration,
    peripheral_id: Mutex<Option<String>>,
    outgoing: Mutex<Fragmenter>,
    incoming: Mutex<Fragmenter>,
    send_in_flight: Mutex<bool>,
    l2cap_active: Mutex<bool>,
    l2cap_ever_succeeded: Mutex<bool>,
    last_activity: Mutex<Instant>,
    on_received: Mutex<Option<Box<dyn Fn(Vec<u8>) + Send + Sync>>>,
    on_state_change: Mutex<Option<Box<dyn Fn(ConnectionState) + Send + Sync>>>,
}

impl CentralClient {
    pub fn new(
        profile: GattProfile,
        delegate: Arc<dyn BleCentralDelegate>,
        state_machine: ConnectionStateMachine,
        config: Configuration,
    ) -> Arc<Self> {
        let max_message_bytes = config.max_message_bytes as usize;
        Arc::new(Self {
            profile,
            delegate,
            state_machine: state_machine.clone(),
            termination: Arc::new(TerminationProvider::new(state_machine)),
            config,
            peripheral_id: Mutex::new(None),
            outgoing: Mutex::new(Fragmenter::new(23, max_message_bytes)),
            incoming: Mutex::new(Fragmenter::new(23, max_message_bytes)),
            send_in_flight: Mutex::new(false),
            l2cap_active: Mutex::new(false),
            l2cap_ever_succeeded: Mutex::new(false),
            last_activity: Mutex::new(Instant::now()),
            on_received: Mutex::new(None),
            on_state_change: Mutex::new(None),
        })
    }

    pub fn on_received<F>(&self, callback: F)
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        *self.on_received.lock().unwrap() = Some(Box::new(callback));
    }

    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        *self.on_state_change.lock().unwrap() = Some(Box::new(callback));
    }

    pub fn state_machine(&self) -> &ConnectionStateMachine {
        &self.state_machine
    }

    pub fn set_negotiated_mtu(&self, mtu: usize) {
        *self.outgoing.lock().unwrap() = Fragmenter::new(mtu, self.config.max_message_bytes as usize);
    }

    /// Scans, connects, discovers characteristics, verifies Ident, subscribes,
    /// upgrades to L2CAP when configured, and writes `0x01` to State. The whole
    /// sequence is bounded by `connection_timeout_ms`; once it completes, a
    /// background monitor enforces `idle_timeout_ms` against subsequent frames.
    pub async fn start(self: &Arc<Self>, expected_ident: Ident) -> Result<(), TransportError> {
        let bound = Duration::from_millis(self.config.connection_timeout_ms);
        let this = Arc::clone(self);
        match tokio::time::timeout(bound, this.establish(expected_ident)).await {
            Ok(result) => result,
            Err(_) => {
                let err = TransportError::Timeout;
                self.termination.handle_error(&err);
                Err(err)
            }
        }
    }

    async fn establish(self: Arc<Self>, expected_ident: Ident) -> Result<(), TransportError> {
        self.state_machine.transition_to(ConnectionState::Scanning);
        let scan = retry_or_terminate(&self.state_machine, &self.termination, || {
            self.delegate
                .scan(self.profile.service_uuid.to_string(), self.config.scan_timeout_ms)
        })
        .await?;

        self.state_machine.transition_to(ConnectionState::Connecting);
        retry_or_terminate(&self.state_machine, &self.termination, || {
            self.delegate.connect(scan.peripheral_id.clone())
        })
        .await?;
        *self.peripheral_id.lock().unwrap() = Some(scan.peripheral_id.clone());

        retry_or_terminate(&self.state_machine, &self.termination, || {
            self.delegate.discover_characteristics(scan.peripheral_id.clone())
        })
        .await?;

        let ident_bytes = retry_or_terminate(&self.state_machine, &self.termination, || {
            self.delegate
                .read_characteristic(scan.peripheral_id.clone(), "ident".to_string())
        })
        .await?;
        let actual_ident = Ident::from_slice(&ident_bytes).ok_or_else(|| {
            TransportError::ProtocolViolation("ident characteristic was not 16 bytes".into())
        });
        let actual_ident = match actual_ident {
            Ok(i) => i,
            Err(err) => {
                self.termination.handle_error(&err);
                return Err(err);
            }
        };
        if !actual_ident.constant_time_eq(&expected_ident) {
            let err = TransportError::ProtocolViolation("ident mismatch".into());
            self.termination.handle_error(&err);
            return Err(err);
        }

        for characteristic in ["state", "server2client"] {
            retry_or_terminate(&self.state_machine, &self.termination, || {
                self.delegate
                    .subscribe(scan.peripheral_id.clone(), characteristic.to_string())
            })
            .await?;
        }

        self.negotiate_l2cap(&scan.peripheral_id).await?;

        let sender = Arc::new(SenderAdapter {
            delegate: self.delegate.clone(),
            peripheral_id: scan.peripheral_id.clone(),
            runtime: tokio::runtime::Handle::current(),
        });
        self.termination.set_client_sender(sender);

        retry_or_terminate(&self.state_machine, &self.termination, || {
            self.delegate.write_characteristic(
                scan.peripheral_id.clone(),
                "state".to_string(),
                vec![STATE_START],
                true,
            )
        })
        .await?;

        self.touch_activity();
        let monitor = Arc::clone(&self);
        tokio::spawn(async move { monitor.run_timeout_monitor().await });

        Ok(())
    }

    /// Reads the PSM characteristic and opens an L2CAP channel when
    /// `L2capPolicy` allows it. `Force` without an available channel is terminal;
    /// `Auto` silently keeps the session on GATT.
    async fn negotiate_l2cap(&self, peripheral_id: &str) -> Result<(), TransportError> {
        if self.config.use_l2cap == L2capPolicy::Disable {
            return Ok(());
        }
        let Some(_) = self.profile.l2cap_psm else {
            return if self.config.use_l2cap == L2capPolicy::Force {
                let err = TransportError::ProtocolViolation(
                    "L2CAP required but the profile offers no PSM characteristic".into(),
                );
                self.termination.handle_error(&err);
                Err(err)
            } else {
                Ok(())
            };
        };

        let psm_read = self
            .delegate
            .read_characteristic(peripheral_id.to_string(), "l2cap_psm".to_string())
            .await
            .ok()
            .and_then(|bytes| GattProfile::decode_psm(&bytes));
        let Some(psm) = psm_read else {
            return if self.config.use_l2cap == L2capPolicy::Force {
                let err = TransportError::ProtocolViolation("L2CAP PSM characteristic unreadable".into());
                self.termination.handle_error(&err);
                Err(err)
            } else {
                Ok(())
            };
        };

        match self.delegate.open_l2cap_channel(peripheral_id.to_string(), psm).await {
            Ok(()) => {
                *self.l2cap_active.lock().unwrap() = true;
                Ok(())
            }
            Err(err) if self.config.use_l2cap == L2capPolicy::Force => {
                self.termination.handle_error(&err);
                Err(err)
            }
            Err(err) => {
                tracing::warn!("L2CAP channel open failed, staying on GATT: {err}");
                Ok(())
            }
        }
    }

    /// Called by the platform on a Server2Client notification.
    pub fn on_server_notify(self: &Arc<Self>, frame: Vec<u8>) {
        self.touch_activity();
        if self.state_machine.is_in_state(&ConnectionState::Connecting) {
            self.state_machine.transition_to(ConnectionState::Connected);
            self.fire_state_change();
        }
        let accepted = self.incoming.lock().unwrap().accept(&frame);
        match accepted {
            Ok(Accepted::Pending) => {}
            Ok(Accepted::Message(message)) => {
                if let Some(cb) = self.on_received.lock().unwrap().as_ref() {
                    cb(message);
                }
            }
            Ok(Accepted::Terminate) => {
                self.termination.terminate();
                self.fire_state_change();
            }
            Err(err) => {
                self.termination.handle_error(&TransportError::Frame(err));
            }
        }
    }

    /// Called by the platform when an L2CAP frame arrives: the CoC channel carries one
    /// whole application message per call, with no GATT-style fragmentation.
    pub fn on_l2cap_data(self: &Arc<Self>, payload: Vec<u8>) {
        self.touch_activity();
        if self.state_machine.is_in_state(&ConnectionState::Connecting) {
            self.state_machine.transition_to(ConnectionState::Connected);
            self.fire_state_change();
        }
        if let Some(cb) = self.on_received.lock().unwrap().as_ref() {
            cb(payload);
        }
    }

    /// Called by the platform on a State-characteristic notification from the peer.
    pub fn on_state_notify(self: &Arc<Self>, byte: u8) {
        self.touch_activity();
        if byte == STATE_END {
            self.termination.terminate();
            self.fire_state_change();
        }
    }

    pub fn on_disconnected(self: &Arc<Self>) {
        if self.state_machine.is_in_state(&ConnectionState::Connected) {
            self.state_machine
                .transition_to(ConnectionState::Disconnected);
            self.fire_state_change();
        } else if !matches!(self.state_machine.get_state(), ConnectionState::Idle) {
            self.termination
                .handle_error(&TransportError::PrematureDisconnect);
        }
    }

    pub async fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        let peripheral_id = self
            .peripheral_id
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| TransportError::ProtocolViolation("not connected".into()))?;
        {
            let mut in_flight = self.send_in_flight.lock().unwrap();
            if *in_flight {
                return Err(TransportError::ProtocolViolation(
                    "send already in flight".into(),
                ));
            }
            *in_flight = true;
        }
        let result = self.send_inner(&peripheral_id, message).await;
        *self.send_in_flight.lock().unwrap() = false;
        if result.is_ok() {
            self.touch_activity();
        }
        result
    }

    async fn send_inner(&self, peripheral_id: &str, message: &[u8]) -> Result<(), TransportError> {
        if *self.l2cap_active.lock().unwrap() {
            let send_timeout = Duration::from_millis(self.config.send_timeout_ms);
            let result = with_timeout(
                send_timeout,
                self.delegate.l2cap_write(peripheral_id.to_string(), message.to_vec()),
            )
            .await;
            match result {
                Ok(()) => {
                    *self.l2cap_ever_succeeded.lock().unwrap() = true;
                    return Ok(());
                }
                Err(err) if *self.l2cap_ever_succeeded.lock().unwrap() => {
                    self.termination.handle_error(&err);
                    return Err(err);
                }
                Err(err) => {
                    *self.l2cap_active.lock().unwrap() = false;
                    tracing::warn!("L2CAP write failed before any successful message, falling back to GATT: {err}");
                }
            }
        }

        let frames = self.outgoing.lock().unwrap().frame(message);
        for frame in frames {
            let send_timeout = Duration::from_millis(self.config.send_timeout_ms);
            retry_or_terminate(&self.state_machine, &self.termination, || {
                with_timeout(
                    send_timeout,
                    self.delegate.write_characteristic(
                        peripheral_id.to_string(),
                        "client2server".to_string(),
                        frame.clone(),
                        true,
                    ),
                )
            })
            .await?;
        }
        Ok(())
    }

    pub async fn terminate(&self) -> Result<(), TransportError> {
        self.termination.terminate();
        if let Some(peripheral_id) = self.peripheral_id.lock().unwrap().clone() {
            if *self.l2cap_active.lock().unwrap() {
                let _ = self.delegate.close_l2cap_channel(peripheral_id.clone()).await;
            }
            self.delegate.disconnect(peripheral_id).await
        } else {
            Ok(())
        }
    }

    fn touch_activity(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// Polls every 250 ms: `connection_timeout_ms` bounds `Scanning`/`Connecting`,
    /// `idle_timeout_ms` bounds silence once `Connected`. Exits once the endpoint
    /// leaves those states, whichever happens first.
    async fn run_timeout_monitor(self: Arc<Self>) {
        loop {
            tokio::time::sleep(Duration::from_millis(250)).await;
            let state = self.state_machine.get_state();
            let limit_ms = match state {
                ConnectionState::Scanning | ConnectionState::Connecting => {
                    Some(self.config.connection_timeout_ms)
                }
                ConnectionState::Connected => Some(self.config.idle_timeout_ms),
                _ => None,
            };
            let Some(limit_ms) = limit_ms else { return };
            if self.last_activity.lock().unwrap().elapsed() > Duration::from_millis(limit_ms) {
                self.termination.handle_error(&TransportError::Timeout);
                return;
            }
        }
    }

    fn fire_state_change(&self) {
        self.touch_activity();
        if let Some(cb) = self.on_state_change.lock().unwrap().as_ref() {
            cb(self.state_machine.get_state());
        }
    }
}
