//! Bridge transport: wire protocol, request/response multiplexer, and the
//! typed client for the external session process.

mod bridge;
mod mux;
mod protocol;

pub use bridge::{BridgeClient, BridgePort};
pub use mux::{EventHandler, Multiplexer};
pub use protocol::{Chat, Contact, Inbound, InboundEvent, Message, Request, Response};
