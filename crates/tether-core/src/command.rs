//! Commands exchanged over the channel.
//!
//! On the wire every command is one JSON object:
//!
//! ```text
//! {"type":"ping","id":"6f1c...","timestamp":1700000000000}
//! ```
//!
//! `type` selects the body. Tags this crate does not know decode to
//! [`CommandBody::Custom`] with the remaining fields kept intact, so newer
//! peers can introduce commands without breaking older ones.

use crate::identity::{DeviceDescriptor, DriverDescriptor, PeerIdentity, Role};
use crate::signature::now_millis;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Correlation id carried by every command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(String);

impl CommandId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for CommandId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tags with a typed body. Anything else is [`CommandBody::Custom`].
const KNOWN_KINDS: &[&str] = &[
    "device_announce",
    "driver_announce",
    "challenge_response",
    "ping",
    "farewell",
];

/// Keys owned by the envelope; a custom payload may not use them.
const ENVELOPE_KEYS: &[&str] = &["type", "id", "timestamp"];

/// The typed part of a command, selected by the `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandBody {
    /// A device introducing itself. The salt makes it a challenge.
    DeviceAnnounce {
        device: DeviceDescriptor,
        salt: String,
    },
    /// A driver introducing itself. The salt makes it a challenge.
    DriverAnnounce {
        driver: DriverDescriptor,
        salt: String,
    },
    /// Proof that the sender knows the shared secret.
    ChallengeResponse {
        command_id: CommandId,
        signature: String,
    },
    /// Keep-alive.
    Ping,
    /// Best-effort notice that the sender is going away.
    Farewell {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Application command this crate does not interpret.
    #[serde(skip)]
    Custom {
        kind: String,
        payload: Map<String, Value>,
    },
}

/// A command envelope: correlation id, creation time and body.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: CommandId,
    /// Creation time in unix milliseconds.
    pub timestamp: u64,
    pub body: CommandBody,
}

impl Command {
    /// Wrap `body` with a fresh id and the current time.
    pub fn new(body: CommandBody) -> Self {
        Self {
            id: CommandId::new(),
            timestamp: now_millis(),
            body,
        }
    }

    /// The announce for `identity`, carrying `salt` as its challenge.
    pub fn announce(identity: &PeerIdentity, salt: impl Into<String>) -> Self {
        let salt = salt.into();
        Self::new(match identity {
            PeerIdentity::Device(device) => CommandBody::DeviceAnnounce {
                device: device.clone(),
                salt,
            },
            PeerIdentity::Driver(driver) => CommandBody::DriverAnnounce {
                driver: driver.clone(),
                salt,
            },
        })
    }

    pub fn challenge_response(command_id: CommandId, signature: impl Into<String>) -> Self {
        Self::new(CommandBody::ChallengeResponse {
            command_id,
            signature: signature.into(),
        })
    }

    pub fn ping() -> Self {
        Self::new(CommandBody::Ping)
    }

    pub fn farewell(reason: Option<String>) -> Self {
        Self::new(CommandBody::Farewell { reason })
    }

    pub fn custom(kind: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self::new(CommandBody::Custom {
            kind: kind.into(),
            payload,
        })
    }

    /// The wire tag.
    pub fn kind(&self) -> &str {
        match &self.body {
            CommandBody::DeviceAnnounce { .. } => "device_announce",
            CommandBody::DriverAnnounce { .. } => "driver_announce",
            CommandBody::ChallengeResponse { .. } => "challenge_response",
            CommandBody::Ping => "ping",
            CommandBody::Farewell { .. } => "farewell",
            CommandBody::Custom { kind, .. } => kind,
        }
    }

    /// Challenge salt, if this command is an announce.
    pub fn salt(&self) -> Option<&str> {
        match &self.body {
            CommandBody::DeviceAnnounce { salt, .. } | CommandBody::DriverAnnounce { salt, .. } => {
                Some(salt)
            }
            _ => None,
        }
    }

    /// Whether this is the announce a peer playing `role` would send.
    pub fn is_announce_from(&self, role: Role) -> bool {
        matches!(
            (&self.body, role),
            (CommandBody::DeviceAnnounce { .. }, Role::Device)
                | (CommandBody::DriverAnnounce { .. }, Role::Driver)
        )
    }

    /// Whether this command survives encoding unchanged. Custom commands
    /// may not borrow a built-in tag or an envelope key.
    pub fn check(&self) -> Result<(), CodecError> {
        let CommandBody::Custom { kind, payload } = &self.body else {
            return Ok(());
        };
        if kind.is_empty() {
            return Err(CodecError::invalid("type", "custom kind cannot be empty"));
        }
        if KNOWN_KINDS.contains(&kind.as_str()) {
            return Err(CodecError::ReservedKind(kind.clone()));
        }
        if let Some(key) = ENVELOPE_KEYS.iter().find(|key| payload.contains_key(**key)) {
            return Err(CodecError::ReservedField(*key));
        }
        Ok(())
    }

    /// Encode as a single JSON text message.
    pub fn encode(&self) -> Result<String, CodecError> {
        self.check()?;
        let mut fields = match &self.body {
            CommandBody::Custom { kind, payload } => {
                let mut fields = payload.clone();
                fields.insert("type".into(), Value::String(kind.clone()));
                fields
            }
            body => match serde_json::to_value(body)? {
                Value::Object(fields) => fields,
                _ => return Err(CodecError::NotAnObject),
            },
        };
        fields.insert("id".into(), Value::String(self.id.0.clone()));
        fields.insert("timestamp".into(), Value::from(self.timestamp));
        Ok(serde_json::to_string(&Value::Object(fields))?)
    }

    /// Decode a JSON text message.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let Value::Object(mut fields) = serde_json::from_str(text)? else {
            return Err(CodecError::NotAnObject);
        };

        let id = match fields.remove("id") {
            Some(Value::String(id)) => CommandId(id),
            Some(_) => return Err(CodecError::invalid("id", "expected a string")),
            None => return Err(CodecError::MissingField("id")),
        };
        let timestamp = match fields.remove("timestamp") {
            Some(value) => value
                .as_u64()
                .ok_or_else(|| CodecError::invalid("timestamp", "expected unix milliseconds"))?,
            None => return Err(CodecError::MissingField("timestamp")),
        };
        let kind = match fields.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(CodecError::invalid("type", "expected a string")),
            None => return Err(CodecError::MissingField("type")),
        };

        let body = if KNOWN_KINDS.contains(&kind.as_str()) {
            serde_json::from_value(Value::Object(fields))?
        } else {
            fields.remove("type");
            CommandBody::Custom {
                kind,
                payload: fields,
            }
        };

        Ok(Self {
            id,
            timestamp,
            body,
        })
    }
}

/// Error encoding or decoding a command.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed command: {0}")]
    Json(#[from] serde_json::Error),
    #[error("command must be a JSON object")]
    NotAnObject,
    #[error("command is missing '{0}'")]
    MissingField(&'static str),
    #[error("'{0}' is a built-in command type")]
    ReservedKind(String),
    #[error("'{0}' is an envelope field and cannot appear in a payload")]
    ReservedField(&'static str),
    #[error("invalid '{field}': {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

impl CodecError {
    fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::InvalidField { field, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn device() -> PeerIdentity {
        PeerIdentity::Device(DeviceDescriptor {
            id: "emu-5554".into(),
            name: "Pixel".into(),
            platform: "android".into(),
            os_version: Some("14".into()),
        })
    }

    #[test]
    fn encode_is_flat() {
        let cmd = Command::announce(&device(), "abcd");
        let value: Value = serde_json::from_str(&cmd.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "device_announce");
        assert_eq!(value["salt"], "abcd");
        assert_eq!(value["device"]["platform"], "android");
        assert_eq!(value["id"], cmd.id.as_str());
        assert_eq!(value["timestamp"], cmd.timestamp);
    }

    #[test]
    fn decode_challenge_response() {
        let text = json!({
            "type": "challenge_response",
            "id": "r-1",
            "timestamp": 42,
            "command_id": "c-1",
            "signature": "beef",
        })
        .to_string();
        let cmd = Command::decode(&text).unwrap();
        assert_eq!(cmd.id.as_str(), "r-1");
        assert_eq!(cmd.timestamp, 42);
        assert_eq!(
            cmd.body,
            CommandBody::ChallengeResponse {
                command_id: "c-1".into(),
                signature: "beef".into(),
            }
        );
    }

    #[test]
    fn unknown_kind_is_kept_as_custom() {
        let text = r#"{"type":"tap","id":"x","timestamp":7,"x":10,"y":20}"#;
        let cmd = Command::decode(text).unwrap();
        assert_eq!(cmd.kind(), "tap");
        match &cmd.body {
            CommandBody::Custom { kind, payload } => {
                assert_eq!(kind, "tap");
                assert_eq!(payload["x"], 10);
                assert!(!payload.contains_key("type"));
                assert!(!payload.contains_key("id"));
            }
            other => panic!("expected custom body, got {other:?}"),
        }

        let again = Command::decode(&cmd.encode().unwrap()).unwrap();
        assert_eq!(again, cmd);
    }

    #[test]
    fn custom_cannot_impersonate_builtin_kinds() {
        let mut payload = Map::new();
        payload.insert("x".into(), json!(1));
        for kind in KNOWN_KINDS {
            let cmd = Command::custom(*kind, payload.clone());
            assert!(matches!(cmd.encode(), Err(CodecError::ReservedKind(k)) if k == *kind));
        }
        assert!(matches!(
            Command::custom("", payload).encode(),
            Err(CodecError::InvalidField { field: "type", .. })
        ));
    }

    #[test]
    fn custom_payload_cannot_shadow_envelope() {
        for key in ["id", "timestamp", "type"] {
            let mut payload = Map::new();
            payload.insert(key.into(), json!("user-id"));
            let cmd = Command::custom("login", payload);
            assert!(matches!(cmd.check(), Err(CodecError::ReservedField(k)) if k == key));
            assert!(cmd.encode().is_err());
        }

        let mut payload = Map::new();
        payload.insert("user_id".into(), json!("user-id"));
        let cmd = Command::custom("login", payload);
        assert_eq!(Command::decode(&cmd.encode().unwrap()).unwrap(), cmd);
    }

    #[test]
    fn ping_and_farewell() {
        let cmd = Command::decode(r#"{"type":"ping","id":"p","timestamp":1}"#).unwrap();
        assert_eq!(cmd.body, CommandBody::Ping);

        let bye = Command::farewell(None).encode().unwrap();
        assert!(!bye.contains("reason"));
    }

    #[test]
    fn rejects_bad_envelopes() {
        assert!(matches!(
            Command::decode("[1,2]"),
            Err(CodecError::NotAnObject)
        ));
        assert!(matches!(
            Command::decode(r#"{"type":"ping","timestamp":1}"#),
            Err(CodecError::MissingField("id"))
        ));
        assert!(matches!(
            Command::decode(r#"{"type":"ping","id":"a"}"#),
            Err(CodecError::MissingField("timestamp"))
        ));
        assert!(matches!(
            Command::decode(r#"{"id":"a","timestamp":1}"#),
            Err(CodecError::MissingField("type"))
        ));
        assert!(matches!(
            Command::decode(r#"{"type":"ping","id":"a","timestamp":"soon"}"#),
            Err(CodecError::InvalidField { field: "timestamp", .. })
        ));
        // known tag, wrong shape
        assert!(matches!(
            Command::decode(r#"{"type":"challenge_response","id":"a","timestamp":1}"#),
            Err(CodecError::Json(_))
        ));
        assert!(Command::decode("not json").is_err());
    }

    #[test]
    fn announce_matches_role() {
        let cmd = Command::announce(&device(), "s");
        assert!(cmd.is_announce_from(Role::Device));
        assert!(!cmd.is_announce_from(Role::Driver));
        assert_eq!(cmd.salt(), Some("s"));
        assert_eq!(Command::ping().salt(), None);
    }
}
