//! The presentation session (component H): owns a parsed mdoc, derives device
//! engagement material, parses a reader's request, and produces a signed response.
//!
//! Exactly one [`PresentationSession`] exists per presentment; it is immutable after
//! [`PresentationSession::submit_response`] and accepts at most one
//! [`PresentationSession::handle_request`] call, per the invariants in the data model.

use std::collections::HashMap;
use std::ops::DerefMut;
use std::sync::{Arc, Mutex};

use isomdl::definitions::session::Handover;
use isomdl::definitions::x509::trust_anchor::TrustAnchorRegistry;
use isomdl::{
    definitions::{
        device_engagement::{CentralClientMode, DeviceRetrievalMethods},
        helpers::NonEmptyMap,
        BleOptions, DeviceRetrievalMethod, SessionEstablishment,
    },
    presentation::device::{self, SessionManagerInit},
};
use uuid::Uuid;

use crate::ble::facade::{EngagementOrigin, PresentationMode};
use crate::crypto::ensure_raw_fixed_width_signature;
use crate::mdoc::Mdoc;

/// How device engagement was published. Mirrors the `CredentialPresentData` variants
/// named in the end-to-end scenarios: QR carries a central-client UUID the holder
/// generated; NFC carries the BLE carrier already negotiated by the (out-of-scope)
/// NFC handshake, and is modeled only as that hand-off, never the handshake itself.
#[derive(uniffi::Enum, Debug, Clone)]
pub enum DeviceEngagementData {
    Qr {
        central_client_uuid: Uuid,
        peripheral_service_uuid: Option<Uuid>,
    },
    Nfc {
        central_client_uuid: Uuid,
        peripheral_service_uuid: Option<Uuid>,
    },
}

impl DeviceEngagementData {
    fn origin(&self) -> EngagementOrigin {
        match self {
            DeviceEngagementData::Qr { .. } => EngagementOrigin::Qr,
            DeviceEngagementData::Nfc { .. } => EngagementOrigin::Nfc,
        }
    }

    fn central_client_uuid(&self) -> Uuid {
        match self {
            DeviceEngagementData::Qr { central_client_uuid, .. }
            | DeviceEngagementData::Nfc { central_client_uuid, .. } => *central_client_uuid,
        }
    }

    /// Service UUID the holder advertises when acting as a GATT peripheral. `None`
    /// when the engagement was only ever set up for `CentralOnly` presentment.
    fn peripheral_service_uuid(&self) -> Option<Uuid> {
        match self {
            DeviceEngagementData::Qr { peripheral_service_uuid, .. }
            | DeviceEngagementData::Nfc { peripheral_service_uuid, .. } => *peripheral_service_uuid,
        }
    }

    fn handover(&self) -> Handover {
        match self {
            // 18013-5 §9.1.5.1 models only the carrier hand-off, not the NFC handshake.
            DeviceEngagementData::Qr { .. } => Handover::QR,
            DeviceEngagementData::Nfc { .. } => Handover::NFC(vec![], None),
        }
    }
}

/// The BLE carrier(s) this session's device engagement advertises, mirroring
/// `PresentationMode`: `CentralOnly` sessions carry only `central_client`.
#[derive(uniffi::Record, Debug, Clone)]
pub struct CarrierDescriptor {
    pub central_client: Option<CentralClientDetails>,
    pub peripheral_server: Option<PeripheralServerDetails>,
}

#[derive(uniffi::Record, Debug, Clone, Copy)]
pub struct CentralClientDetails {
    pub service_uuid: Uuid,
}

#[derive(uniffi::Record, Debug, Clone, Copy)]
pub struct PeripheralServerDetails {
    pub service_uuid: Uuid,
    pub psm: Option<u16>,
}

/// Begins a presentation session for `mdoc`, validating `mode` against the
/// engagement's origin (end-to-end scenario 6: `DualMode` rejects an NFC-derived
/// engagement immediately, before any BLE resource is touched).
#[uniffi::export]
pub fn initialize_presentation_session(
    mdoc: Arc<Mdoc>,
    engagement: DeviceEngagementData,
    mode: PresentationMode,
) -> Result<PresentationSession, SessionError> {
    mode.validate_for(engagement.origin())
        .map_err(|e| SessionError::InvalidMode { value: e.to_string() })?;

    let documents = NonEmptyMap::new(mdoc.doc_type(), mdoc.document().clone());
    let handover = engagement.handover();
    let drms = DeviceRetrievalMethods::new(DeviceRetrievalMethod::BLE(BleOptions {
        peripheral_server_mode: None,
        central_client_mode: Some(CentralClientMode {
            uuid: engagement.central_client_uuid(),
        }),
    }));
    let session = SessionManagerInit::initialise(documents, Some(drms), None).map_err(|e| {
        SessionError::Generic {
            value: format!("could not initialize session: {e:?}"),
        }
    })?;

    let ble_ident = session
        .ble_ident()
        .map_err(|e| SessionError::Generic {
            value: format!("could not derive BLE ident: {e:?}"),
        })?
        .to_vec();
    let engaged_state = session.engage(handover).map_err(|e| SessionError::Generic {
        value: format!("could not generate device engagement: {e:?}"),
    })?;

    // isomdl's own `BleOptions.peripheral_server_mode` stays `None` above regardless
    // of `mode`: no construction site for `PeripheralServerMode` exists anywhere in
    // the corpus this core is grounded on, so its field shape is unknown and is not
    // fabricated here. `CarrierDescriptor` below is this crate's own record, wholly
    // under this crate's control, and is populated per `mode` independently of that.
    let central_client = matches!(mode, PresentationMode::CentralOnly | PresentationMode::DualMode)
        .then(|| CentralClientDetails {
            service_uuid: engagement.central_client_uuid(),
        });
    let peripheral_server = if matches!(mode, PresentationMode::PeripheralOnly | PresentationMode::DualMode) {
        let service_uuid = engagement.peripheral_service_uuid().ok_or_else(|| SessionError::Generic {
            value: "mode requires a peripheral service uuid but the engagement carried none".into(),
        })?;
        Some(PeripheralServerDetails {
            service_uuid,
            psm: None,
        })
    } else {
        None
    };

    Ok(PresentationSession {
        engaged: Mutex::new(engaged_state),
        in_process: Mutex::new(None),
        response_submitted: Mutex::new(false),
        ble_ident,
        carrier: CarrierDescriptor {
            central_client,
            peripheral_server,
        },
    })
}

#[derive(uniffi::Object)]
pub struct PresentationSession {
    engaged: Mutex<device::SessionManagerEngaged>,
    in_process: Mutex<Option<InProcessRecord>>,
    response_submitted: Mutex<bool>,
    ble_ident: Vec<u8>,
    carrier: CarrierDescriptor,
}

struct InProcessRecord {
    session: device::SessionManager,
    items_request: device::RequestedItems,
    reader_common_name: Option<String>,
}

#[uniffi::export]
impl PresentationSession {
    /// `mdoc:` + base64url(CBOR device engagement), per ISO 18013-5 §8.2.2.1.
    pub fn qr_engagement_uri(&self) -> Result<String, SessionError> {
        self.engaged
            .lock()
            .map_err(|e| SessionError::Mutex { value: e.to_string() })?
            .qr_handover()
            .map_err(|e| SessionError::Generic {
                value: format!("could not generate device engagement URI: {e:?}"),
            })
    }

    pub fn ble_ident(&self) -> Vec<u8> {
        self.ble_ident.clone()
    }

    pub fn carrier_descriptors(&self) -> CarrierDescriptor {
        self.carrier.clone()
    }

    /// Parses a reader's request. Accepted exactly once per session; every
    /// subsequent call returns [`RequestError::AlreadyProcessed`] without touching
    /// state, per the "at most one `handleRequest`" invariant.
    pub fn handle_request(&self, request: Vec<u8>) -> Result<Vec<ItemsRequest>, RequestError> {
        {
            let in_process = self
                .in_process
                .lock()
                .map_err(|_| RequestError::Generic {
                    value: "could not lock session state".into(),
                })?;
            if in_process.is_some() {
                tracing::info!("second handleRequest call ignored; session already processed one");
                return Err(RequestError::AlreadyProcessed);
            }
        }

        let session_establishment: SessionEstablishment = isomdl::cbor::from_slice(&request)
            .map_err(|e| RequestError::MalformedRequest {
                value: format!("could not deserialize request: {e:?}"),
            })?;
        let (session_manager, items_requests) = self
            .engaged
            .lock()
            .map_err(|_| RequestError::Generic {
                value: "could not lock session state".into(),
            })?
            .clone()
            .process_session_establishment(session_establishment, TrustAnchorRegistry::default())
            .map_err(|e| RequestError::MalformedRequest {
                value: format!("could not process session establishment: {e:?}"),
            })?;

        let mut in_process = self.in_process.lock().map_err(|_| RequestError::Generic {
            value: "could not lock session state".into(),
        })?;
        *in_process = Some(InProcessRecord {
            session: session_manager,
            items_request: items_requests.items_request.clone(),
            reader_common_name: items_requests.common_name,
        });

        Ok(items_requests
            .items_request
            .into_iter()
            .map(|req| ItemsRequest {
                doc_type: req.doc_type,
                namespaces: req
                    .namespaces
                    .into_inner()
                    .into_iter()
                    .map(|(ns, es)| (ns, es.into_inner().into_iter().collect()))
                    .collect(),
            })
            .collect())
    }

    /// Common name from the reader's authentication certificate, if the request
    /// carried one. Never cached across sessions (see the open-question resolution).
    pub fn reader_name(&self) -> Result<Option<String>, SessionError> {
        Ok(self
            .in_process
            .lock()
            .map_err(|e| SessionError::Mutex { value: e.to_string() })?
            .as_ref()
            .and_then(|r| r.reader_common_name.clone()))
    }

    /// Builds the device-namespaces CBOR payload the external signer must sign.
    pub fn generate_response(
        &self,
        permitted: HashMap<String, HashMap<String, Vec<String>>>,
    ) -> Result<Vec<u8>, ResponseError> {
        if *self.response_submitted.lock().map_err(|e| ResponseError::Mutex { value: e.to_string() })? {
            return Err(ResponseError::AlreadySubmitted);
        }
        let permitted = permitted
            .into_iter()
            .map(|(doc_type, namespaces)| (doc_type, namespaces.into_iter().collect()))
            .collect();
        let mut guard = self.in_process.lock().map_err(|_| ResponseError::Generic {
            value: "could not lock session state".into(),
        })?;
        let in_process = guard.as_mut().ok_or(ResponseError::Generic {
            value: "handleRequest has not completed".into(),
        })?;
        in_process
            .session
            .prepare_response(&in_process.items_request, permitted);
        let (_, payload) = in_process
            .session
            .get_next_signature_payload()
            .ok_or(ResponseError::MissingSignature)?;
        Ok(payload.to_vec())
    }

    /// Accepts the external signature (DER or raw fixed-width), normalizes it to the
    /// mdoc wire format's IEEE-P1363 raw encoding, and returns the final response.
    /// After this call succeeds, [`PresentationSession`] is immutable: the next
    /// `handleRequest` is ignored and no further response can be generated.
    pub fn submit_response(&self, signature: Vec<u8>) -> Result<Vec<u8>, ResponseError> {
        if *self.response_submitted.lock().map_err(|e| ResponseError::Mutex { value: e.to_string() })? {
            return Err(ResponseError::AlreadySubmitted);
        }
        let raw_signature = ensure_raw_fixed_width_signature(&signature)
            .map_err(|e| ResponseError::SignatureEncoding { value: e.to_string() })?;
        let mut guard = self.in_process.lock().map_err(|_| ResponseError::Generic {
            value: "could not lock session state".into(),
        })?;
        let in_process = guard.as_mut().ok_or(ResponseError::Generic {
            value: "handleRequest has not completed".into(),
        })?;
        in_process
            .session
            .submit_next_signature(raw_signature)
            .map_err(|e| ResponseError::Generic {
                value: format!("could not submit signature: {e:?}"),
            })?;
        let response = in_process
            .session
            .retrieve_response()
            .ok_or(ResponseError::Generic {
                value: "session produced no response".into(),
            })?;
        *self.response_submitted.lock().unwrap() = true;
        Ok(response)
    }
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct ItemsRequest {
    pub doc_type: String,
    pub namespaces: HashMap<String, HashMap<String, bool>>,
}

#[derive(thiserror::Error, uniffi::Error, Debug)]
pub enum SessionError {
    #[error("session mutex error: {value}")]
    Mutex { value: String },
    #[error("{value}")]
    Generic { value: String },
    #[error("InvalidMode: {value}")]
    InvalidMode { value: String },
}

#[derive(thiserror::Error, uniffi::Error, Debug)]
pub enum RequestError {
    #[error("a request was already processed for this session")]
    AlreadyProcessed,
    #[error("malformed request: {value}")]
    MalformedRequest { value: String },
    #[error("{value}")]
    Generic { value: String },
}

#[derive(thiserror::Error, uniffi::Error, Debug)]
pub enum ResponseError {
    #[error("no signature payload received from the session")]
    MissingSignature,
    #[error("signature encoding error: {value}")]
    SignatureEncoding { value: String },
    #[error("a response was already submitted for this session")]
    AlreadySubmitted,
    #[error("session mutex error: {value}")]
    Mutex { value: String },
    #[error("{value}")]
    Generic { value: String },
}
