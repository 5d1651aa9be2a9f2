//! Transport-neutral connection machinery and the BLE GATT data-retrieval protocol.
//!
//! Layered leaves-first: [`ident`] and [`fragment`] are pure; [`gatt`] only describes
//! the profile; [`state_machine`] and [`termination`] are the shared authority both
//! roles consult; [`retry`] builds on top of both; [`central`] and [`peripheral`]
//! drive a foreign radio collaborator; [`facade`] wires whichever of those a
//! [`facade::PresentationMode`] calls for.

pub mod central;
pub mod facade;
pub mod fragment;
pub mod gatt;
pub mod ident;
pub mod peripheral;
pub mod retry;
pub mod state_machine;
pub mod termination;
