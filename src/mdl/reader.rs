//! Reader-side counterpart to [`crate::mdl::holder`]: establishes a session from a
//! holder's `mdoc:` URI, builds the ItemsRequest, and validates the signed response.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use isomdl::{
    definitions::{
        device_request,
        helpers::{non_empty_map, NonEmptyMap},
        x509::{
            self,
            trust_anchor::{PemTrustAnchor, TrustAnchorRegistry},
        },
    },
    presentation::{authentication::AuthenticationStatus as IsomdlAuthenticationStatus, reader},
};

#[derive(uniffi::Object)]
pub struct ReaderSessionManager(reader::SessionManager);

impl std::fmt::Debug for ReaderSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReaderSessionManager")
    }
}

#[derive(uniffi::Record)]
pub struct ReaderSessionData {
    pub state: Arc<ReaderSessionManager>,
    pub request: Vec<u8>,
    pub ble_ident: Vec<u8>,
}

#[derive(thiserror::Error, uniffi::Error, Debug)]
pub enum ReaderSessionError {
    #[error("{value}")]
    Generic { value: String },
}

/// Parses a holder's `mdoc:` engagement URI, builds the wire-format ItemsRequest for
/// `requested_items`, and returns the reader-side session state plus the request
/// bytes to be written over the established transport.
#[uniffi::export]
pub fn establish_session(
    engagement_uri: String,
    requested_items: HashMap<String, HashMap<String, bool>>,
    trust_anchor_pems: Option<Vec<String>>,
) -> Result<ReaderSessionData, ReaderSessionError> {
    let namespaces: Result<BTreeMap<_, NonEmptyMap<_, _>>, non_empty_map::Error> =
        requested_items
            .into_iter()
            .map(|(doc_type, elements)| {
                let elements: BTreeMap<_, _> = elements.into_iter().collect();
                elements
                    .try_into()
                    .map(|elements| (doc_type, elements))
            })
            .collect();
    let namespaces = namespaces.map_err(|e| ReaderSessionError::Generic {
        value: format!("unable to build data elements: {e:?}"),
    })?;
    let namespaces: device_request::Namespaces =
        namespaces.try_into().map_err(|e| ReaderSessionError::Generic {
            value: format!("unable to build namespaces: {e:?}"),
        })?;

    let registry = TrustAnchorRegistry::from_pem_certificates(
        trust_anchor_pems
            .into_iter()
            .flatten()
            .map(|certificate_pem| PemTrustAnchor {
                certificate_pem,
                purpose: x509::trust_anchor::TrustPurpose::Iaca,
            })
            .collect(),
    )
    .map_err(|e| ReaderSessionError::Generic {
        value: format!("unable to construct trust anchor registry: {e:?}"),
    })?;

    let (manager, request, ble_ident) =
        reader::SessionManager::establish_session(engagement_uri, namespaces, registry)
            .map_err(|e| ReaderSessionError::Generic {
                value: format!("unable to establish session: {e:?}"),
            })?;

    Ok(ReaderSessionData {
        state: Arc::new(ReaderSessionManager(manager)),
        request,
        ble_ident: ble_ident.to_vec(),
    })
}

/// Device-returned item value, flattened to a JSON-friendly shape for the reader UI.
#[derive(uniffi::Enum, Debug)]
pub enum MDocItem {
    Text(String),
    Bool(bool),
    Integer(i64),
    ItemMap(HashMap<String, MDocItem>),
    Array(Vec<MDocItem>),
}

impl From<serde_json::Value> for MDocItem {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => unreachable!("no null allowed in namespaces"),
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Integer(
                n.as_i64()
                    .unwrap_or_else(|| unreachable!("only integers allowed in namespaces")),
            ),
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Array(a) => {
                Self::Array(a.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(m) => {
                Self::ItemMap(m.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, uniffi::Enum)]
pub enum AuthenticationStatus {
    Valid,
    Invalid,
    Unchecked,
}

impl From<IsomdlAuthenticationStatus> for AuthenticationStatus {
    fn from(internal: IsomdlAuthenticationStatus) -> Self {
        match internal {
            IsomdlAuthenticationStatus::Valid => AuthenticationStatus::Valid,
            IsomdlAuthenticationStatus::Invalid => AuthenticationStatus::Invalid,
            IsomdlAuthenticationStatus::Unchecked => AuthenticationStatus::Unchecked,
        }
    }
}

#[derive(uniffi::Record, Debug)]
pub struct ReaderResponseData {
    pub state: Arc<ReaderSessionManager>,
    pub verified_response: HashMap<String, HashMap<String, MDocItem>>,
    pub issuer_authentication: AuthenticationStatus,
    pub device_authentication: AuthenticationStatus,
    pub errors: Option<String>,
}

#[derive(thiserror::Error, uniffi::Error, Debug)]
pub enum ReaderResponseError {
    #[error("{value}")]
    Generic { value: String },
}

/// Validates the holder's signed response bytes against the trust anchors supplied to
/// [`establish_session`]. The device-signed structure's own verification (certificate
/// chain, issuer signature) is performed here by `isomdl`; this core does not
/// re-implement PKI path validation (see Non-goals).
#[uniffi::export]
pub fn handle_response(
    state: Arc<ReaderSessionManager>,
    response: Vec<u8>,
) -> Result<ReaderResponseData, ReaderResponseError> {
    let mut session = state.0.clone();
    let validated = session.handle_response(&response);

    let errors = if !validated.errors.is_empty() {
        Some(
            serde_json::to_string(&validated.errors).map_err(|e| ReaderResponseError::Generic {
                value: format!("could not serialize errors: {e:?}"),
            })?,
        )
    } else {
        None
    };

    let verified_response = validated
        .response
        .into_iter()
        .map(|(namespace, items)| {
            items
                .as_object()
                .map(|items| {
                    (
                        namespace.to_string(),
                        items
                            .iter()
                            .map(|(item, value)| (item.clone(), value.clone().into()))
                            .collect(),
                    )
                })
                .ok_or_else(|| ReaderResponseError::Generic {
                    value: format!("items for {namespace} were not a JSON object"),
                })
        })
        .collect::<Result<_, _>>()?;

    Ok(ReaderResponseData {
        state: Arc::new(ReaderSessionManager(session)),
        verified_response,
        issuer_authentication: validated.issuer_authentication.into(),
        device_authentication: validated.device_authentication.into(),
        errors,
    })
}
