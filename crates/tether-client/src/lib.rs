//! Client engine for Tether.
//!
//! Both ends of the channel, the device and the driver, run the same
//! engine:
//!
//! - the supervisor keeps at most one connection to the relay alive and
//!   replaces it before the hosting lifetime limit cuts it off
//! - every new connection is authenticated with a mutual challenge/response
//!   handshake before anything else flows
//! - submitted commands wait in an ordered queue until the connection is
//!   online, then go out one at a time
//! - inbound commands are broadcast to subscribers
//!
//! [`Communicator`] is the entry point.

mod communicator;
mod config;
mod dispatcher;
mod error;
mod handshake;
mod keepalive;
mod router;
mod supervisor;
pub mod transport;

pub use communicator::Communicator;
pub use config::{CommunicatorConfig, HandshakeConfig};
pub use error::{ConfigError, HandshakeError, LifecycleError, TransportError};
pub use transport::{Connector, MemoryConnector, MemoryPeer, Transport, WebSocketConnector};

pub use tether_core::{
    Command, CommandBody, CommandId, ConnectionState, DeviceDescriptor, DriverDescriptor,
    HmacSigner, PeerIdentity, Role, Signer,
};
