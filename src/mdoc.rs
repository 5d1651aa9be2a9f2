//! A parsed mdoc credential, ready to be loaded into a presentation session.
//!
//! The core never generates or persists mdocs (see Non-goals); this type only wraps
//! the CBOR document an external credential store or test fixture hands in.

use std::sync::Arc;

use isomdl::presentation::device::Document;

#[derive(thiserror::Error, uniffi::Error, Debug)]
pub enum MdocError {
    #[error("could not decode mdoc CBOR: {0}")]
    Decode(String),
}

/// A single ISO 18013-5 document (today, always `org.iso.18013.5.1.mDL`), parsed from
/// its issuer-signed CBOR representation.
#[derive(uniffi::Object)]
pub struct Mdoc {
    doc_type: String,
    document: Document,
}

#[uniffi::export]
impl Mdoc {
    /// Parses a `Document` from its CBOR bytes, as produced by an mdoc issuance flow
    /// external to this core.
    #[uniffi::constructor]
    pub fn from_cbor(doc_type: String, bytes: Vec<u8>) -> Result<Arc<Self>, MdocError> {
        let document: Document =
            isomdl::cbor::from_slice(&bytes).map_err(|e| MdocError::Decode(e.to_string()))?;
        Ok(Arc::new(Self { doc_type, document }))
    }

    pub fn doc_type(&self) -> String {
        self.doc_type.clone()
    }
}

impl Mdoc {
    pub fn new(doc_type: String, document: Document) -> Self {
        Self { doc_type, document }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }
}
