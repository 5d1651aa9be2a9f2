//! Holder-Peripheral / Reader-Peripheral GATT server role.
//!
//! The actual radio is a foreign collaborator reached through [`BlePeripheralDelegate`],
//! mirroring how [`crate::storage_manager::StorageManagerInterface`] hands persistence to
//! the platform: this core never links against a BLE stack directly.

use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::ble::fragment::{Accepted, Fragmenter};
use crate::ble::gatt::{GattProfile, STATE_END, STATE_START};
use crate::ble::retry::{retry_or_terminate, with_timeout};
use crate::ble::state_machine::{ConnectionState, ConnectionStateMachine};
use crate::ble::termination::{TerminationProvider, TerminationSender};
use crate::config::{Configuration, L2capPolicy};
use crate::error::TransportError;

/// Radio collaborator for the peripheral role. Implemented on the platform side; the
/// Rust core drives it and never touches a BLE stack itself.
#[uniffi::export(with_foreign)]
#[async_trait]
pub trait BlePeripheralDelegate: Send + Sync + Debug {
    /// Begins advertising `service_uuid` with the ident readable on the Ident
    /// characteristic. `psm` is `Some` when the profile offers L2CAP and the policy
    /// in [`Configuration::use_l2cap`] allows advertising one.
    async fn start_advertising(
        &self,
        service_uuid: String,
        ident: Vec<u8>,
        psm: Option<u16>,
    ) -> Result<(), TransportError>;

    async fn stop_advertising(&self) -> Result<(), TransportError>;

    /// Sends a notification on the named characteristic (`"state"` or `"server2client"`).
    async fn notify(&self, characteristic: String, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Tears down the GATT connection to the current central, if any.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Sends an unfragmented application message on the already-open L2CAP channel.
    async fn l2cap_write(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    async fn close_l2cap_channel(&self) -> Result<(), TransportError>;
}

struct SenderAdapter {
    delegate: Arc<dyn BlePeripheralDelegate>,
    runtime: tokio::runtime::Handle,
}

impl TerminationSender for SenderAdapter {
    fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        let delegate = self.delegate.clone();
        let frame = frame.to_vec();
        tokio::task::block_in_place(|| {
            self.runtime
                .block_on(delegate.notify("server2client".to_string(), frame))
        })
    }
}

/// Holder-Peripheral / Reader-Peripheral endpoint. Advertises the service, accepts a
/// single central, and fragments/reassembles application messages over
/// Server2Client/Client2Server.
pub struct PeripheralServer {
    profile: GattProfile,
    delegate: Arc<dyn BlePeripheralDelegate>,
    state_machine: ConnectionStateMachine,
    termination: Arc<TerminationProvider>,
    config: Configuration,
    outgoing: Mutex<Fragmenter>,
    incoming: Mutex<Fragmenter>,
    send_in_flight: Mutex<bool>,
    l2cap_active: Mutex<bool>,
    l2cap_ever_succeeded: Mutex<bool>,
    last_activity: Mutex<Instant>,
    on_received: Mutex<Option<Box<dyn Fn(Vec<u8>) + Send + Sync>>>,
    on_state_change: Mutex<Option<Box<dyn Fn(ConnectionState) + Send + Sync>>>,
    mtu: Mutex<usize>,
}

impl PeripheralServer {
    pub fn new(
        profile: GattProfile,
        delegate: Arc<dyn BlePeripheralDelegate>,
        state_machine: ConnectionStateMachine,
        config: Configuration,
    ) -> Arc<Self> {
        let default_mtu = 23;
        let max_message_bytes = config.max_message_bytes as usize;
        Arc::new(Self {
            profile,
            delegate,
            state_machine: state_machine.clone(),
            termination: Arc::new(TerminationProvider::new(state_machine)),
            config,
            outgoing: Mutex::new(Fragmenter::new(default_mtu, max_message_bytes)),
            incoming: Mutex::new(Fragmenter::new(default_mtu, max_message_bytes)),
            send_in_flight: Mutex::new(false),
            l2cap_active: Mutex::new(false),
            l2cap_ever_succeeded: Mutex::new(false),
            last_activity: Mutex::new(Instant::now()),
            on_received: Mutex::new(None),
            on_state_change: Mutex::new(None),
            mtu: Mutex::new(default_mtu),
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

    /// Negotiated MTU changes the fragmenter's per-frame payload budget; the platform
    /// reports this once the central's MTU request completes.
    pub fn set_negotiated_mtu(&self, mtu: usize) {
        *self.mtu.lock().unwrap() = mtu;
        *self.outgoing.lock().unwrap() = Fragmenter::new(mtu, self.config.max_message_bytes as usize);
    }

    /// Starts advertising, bounded by `connection_timeout_ms`. Advertises a PSM only
    /// when the profile offers one and [`L2capPolicy::Disable`] was not selected; a
    /// concrete PSM value is assigned by the platform at bind time.
    pub async fn start(self: &Arc<Self>, ident: Vec<u8>) -> Result<(), TransportError> {
        let bound = Duration::from_millis(self.config.connection_timeout_ms);
        let this = Arc::clone(self);
        match tokio::time::timeout(bound, this.advertise(ident)).await {
            Ok(result) => result,
            Err(_) => {
                let err = TransportError::Timeout;
                self.termination.handle_error(&err);
                Err(err)
            }
        }
    }

    async fn advertise(self: Arc<Self>, ident: Vec<u8>) -> Result<(), TransportError> {
        self.state_machine.transition_to(ConnectionState::Scanning);
        let psm = if self.config.use_l2cap == L2capPolicy::Disable {
            None
        } else {
            self.profile.l2cap_psm.map(|_| 0x0080u16)
        };
        let result = retry_or_terminate(&self.state_machine, &self.termination, || {
            self.delegate
                .start_advertising(self.profile.service_uuid.to_string(), ident.clone(), psm)
        })
        .await;
        if result.is_ok() {
            self.touch_activity();
            let monitor = Arc::clone(&self);
            tokio::spawn(async move { monitor.run_timeout_monitor().await });
        }
        result
    }

    /// Called by the platform when a central connects.
    pub fn on_central_connected(self: &Arc<Self>) {
        self.state_machine.transition_to(ConnectionState::Connecting);
        let sender = Arc::new(SenderAdapter {
            delegate: self.delegate.clone(),
            runtime: tokio::runtime::Handle::current(),
        });
        self.termination.set_server_sender(sender);
        self.fire_state_change();
    }

    /// Called by the platform when the central opens the L2CAP channel the peripheral
    /// advertised a PSM for.
    pub fn on_l2cap_connected(&self) {
        *self.l2cap_active.lock().unwrap() = true;
    }

    /// Called by the platform on every write to the State characteristic.
    pub fn on_state_write(self: &Arc<Self>, byte: u8) {
        self.touch_activity();
        match byte {
            STATE_START => {
                self.state_machine.transition_to(ConnectionState::Connected);
                self.fire_state_change();
            }
            STATE_END => {
                self.termination.terminate();
                self.fire_state_change();
            }
            _ => {
                self.termination
                    .handle_error(&TransportError::ProtocolViolation(format!(
                        "unexpected state byte {byte:#04x}"
                    )));
            }
        }
    }

    /// Called by the platform on every write to Client2Server.
    pub fn on_client_write(self: &Arc<Self>, frame: Vec<u8>) {
        self.touch_activity();
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

    /// Called by the platform when an L2CAP frame arrives from the central: the CoC
    /// channel carries one whole application message per call, unfragmented.
    pub fn on_l2cap_data(self: &Arc<Self>, payload: Vec<u8>) {
        self.touch_activity();
        if let Some(cb) = self.on_received.lock().unwrap().as_ref() {
            cb(payload);
        }
    }

    /// Called by the platform when the central drops the link unexpectedly.
    pub fn on_disconnected(self: &Arc<Self>) {
        if self.state_machine.is_in_state(&ConnectionState::Connected) {
            self.state_machine
                .transition_to(ConnectionState::Disconnected);
            self.fire_state_change();
        }
    }

    /// Enqueues a fragmented send on Server2Client, or an unfragmented write on the
    /// L2CAP channel once one is active. Ordered; at most one outstanding message.
    pub async fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        {
            let mut in_flight = self.send_in_flight.lock().unwrap();
            if *in_flight {
                return Err(TransportError::ProtocolViolation(
                    "send already in flight".into(),
                ));
            }
            *in_flight = true;
        }
        let result = self.send_inner(message).await;
        *self.send_in_flight.lock().unwrap() = false;
        if result.is_ok() {
            self.touch_activity();
        }
        result
    }

    async fn send_inner(&self, message: &[u8]) -> Result<(), TransportError> {
        if *self.l2cap_active.lock().unwrap() {
            let send_timeout = Duration::from_millis(self.config.send_timeout_ms);
            let result = with_timeout(send_timeout, self.delegate.l2cap_write(message.to_vec())).await;
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
                    self.delegate.notify("server2client".to_string(), frame.clone()),
                )
            })
            .await?;
        }
        Ok(())
    }

    /// Writes `0x02` if still connected, closes the L2CAP channel if one is active,
    /// closes the GATT connection, stops advertising. Idempotent.
    pub async fn terminate(&self) -> Result<(), TransportError> {
        self.termination.terminate();
        if *self.l2cap_active.lock().unwrap() {
            let _ = self.delegate.close_l2cap_channel().await;
        }
        let _ = self.delegate.disconnect().await;
        self.delegate.stop_advertising().await
    }

    fn touch_activity(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// Polls every 250 ms: `connection_timeout_ms` bounds `Scanning`/`Connecting`,
    /// `idle_timeout_ms` bounds silence once `Connected`.
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
