//! Core types for Tether.
//!
//! This crate provides the protocol primitives shared by both ends of the
//! channel: the command envelope, peer identities and the signing
//! capability used by the handshake. Connection handling lives in
//! `tether-client`.

mod command;
mod identity;
mod signature;

pub use command::{CodecError, Command, CommandBody, CommandId};
pub use identity::{DeviceDescriptor, DriverDescriptor, PeerIdentity, Role, RoleParseError};
pub use signature::{HmacSigner, SALT_LEN, SignatureError, Signer, now_millis, random_salt};

/// Public connection state as seen by users of a communicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport, or waiting to retry.
    Offline,
    /// Transport open, handshake in progress.
    Authenticating,
    /// Handshake complete, commands flow.
    Online,
}
