pub mod holder;
pub mod reader;
#[cfg(test)]
pub mod util;

pub use holder::{
    initialize_presentation_session, CarrierDescriptor, CentralClientDetails,
    DeviceEngagementData, ItemsRequest, PeripheralServerDetails, PresentationSession,
    RequestError, ResponseError, SessionError,
};
