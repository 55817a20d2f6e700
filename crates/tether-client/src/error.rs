//! Error types.
//!
//! Transport and handshake errors never reach callers of the communicator:
//! they are logged and turned into a reconnect. Only lifecycle misuse and
//! bad configuration are returned.

use std::time::Duration;
use tether_core::SignatureError;

/// Failure in the underlying duplex channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("connect to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("close failed: {0}")]
    Close(String),
    #[error("transport is closed")]
    Closed,
}

/// Failure of the challenge/response exchange for one epoch.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("handshake did not complete within {elapsed:?}")]
    Timeout { elapsed: Duration },
    #[error("challenge {0} expired without a valid response")]
    ChallengeExpired(String),
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// Misuse of the communicator lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("communicator is already active")]
    AlreadyActive,
    #[error("communicator has been deactivated")]
    Deactivated,
    #[error("communicator has not been activated")]
    NotActive,
}

/// Failure loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
