uniffi::setup_scaffolding!();

pub mod ble;
pub mod common;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logger;
pub mod mdl;
pub mod mdoc;

pub use common::*;
pub use config::Configuration;
pub use error::{ErrorClass, TransportError};
pub use mdl::*;
