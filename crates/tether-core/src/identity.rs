//! Peer identity.
//!
//! Every connection has two ends: a `device` (the instrumented application)
//! and a `driver` (whatever is steering it). Both announce themselves with a
//! descriptor when the transport comes up.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which end of the channel a communicator represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Device,
    Driver,
}

impl Role {
    /// The role expected on the other side of the relay.
    pub fn peer(self) -> Role {
        match self {
            Role::Device => Role::Driver,
            Role::Driver => Role::Device,
        }
    }

    /// The initiator keeps re-announcing until a driver answers; the
    /// responder only waits.
    pub fn is_initiator(self) -> bool {
        self == Role::Device
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Device => "device",
            Role::Driver => "driver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "device" => Ok(Role::Device),
            "driver" => Ok(Role::Driver),
            "" => Err(RoleParseError::Empty),
            _ => Err(RoleParseError::Unknown(s.to_string())),
        }
    }
}

/// Error parsing a role string.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RoleParseError {
    #[error("role must be 'device' or 'driver', got: {0}")]
    Unknown(String),
    #[error("role cannot be empty")]
    Empty,
}

/// Describes the application under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
}

/// Describes the controller attached to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverDescriptor {
    pub id: String,
    pub name: String,
    /// Application the driver wants to talk to.
    pub app_id: String,
}

/// What a communicator announces about itself during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerIdentity {
    Device(DeviceDescriptor),
    Driver(DriverDescriptor),
}

impl PeerIdentity {
    pub fn role(&self) -> Role {
        match self {
            PeerIdentity::Device(_) => Role::Device,
            PeerIdentity::Driver(_) => Role::Driver,
        }
    }

    /// Short name for log lines.
    pub fn name(&self) -> &str {
        match self {
            PeerIdentity::Device(d) => &d.name,
            PeerIdentity::Driver(d) => &d.name,
        }
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerIdentity::Device(d) => write!(f, "device:{}", d.id),
            PeerIdentity::Driver(d) => write!(f, "driver:{}", d.id),
        }
    }
}
