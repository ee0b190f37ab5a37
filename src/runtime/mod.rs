//! Network runtime: framing, connections and protocol binding.
//!
//! - `Message`: bounds-checked frame buffer
//! - `OutputMessagePool`: recycled reply buffers, flushed per dispatch frame
//! - `Connection`: socket lifecycle and the close state machine
//! - `Protocol` / `Service`: per-connection protocol objects and their factories

mod connection;
mod message;
mod output;
mod protocol;
mod service;

pub use connection::{
    BoxedReader, BoxedWriter, Connection, ConnectionRef, ConnectionRegistry, ConnectionState,
};
pub use message::{Message, FRAME_HEADER_SIZE, MAX_MESSAGE_SIZE};
pub use output::{OutputMessage, OutputMessagePool};
pub use protocol::{release_protocol, Protocol, ProtocolBase};
pub use service::{ProtocolKind, ProtocolRegistry, Service, ServicePort};
