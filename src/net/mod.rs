//! Talking to the remote service: the wire transport, the failure taxonomy and
//! the gateway every mutating call goes through.

mod error;
mod gateway;
mod session;
mod transport;

#[cfg(test)]
pub mod testing;

pub use error::{is_connectivity_failure, GatewayError, SendError};
pub use gateway::{Gateway, GatewayResponse};
pub use session::Session;
pub use transport::{send_bounded, ApiRequest, ApiResponse, HttpTransport, Transport};
