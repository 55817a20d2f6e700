//! Duplex text-message transports.
//!
//! The engine only needs to open a channel, push text frames into it, pull
//! text frames out of it and close it. Framing and TLS belong to the
//! implementation.

mod memory;
mod websocket;

pub use memory::{MemoryConnector, MemoryPeer};
pub use websocket::WebSocketConnector;

use async_trait::async_trait;

use crate::error::TransportError;

/// One open connection.
#[async_trait]
pub trait Transport: Send {
    /// Send one text message.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound text message. `None` once the peer has closed.
    ///
    /// Must be cancel-safe: the supervisor polls it inside `select!` and
    /// drops the future whenever another branch wins.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the connection. Calling it more than once is harmless.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}
