//! Communicator configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Clone, Serialize, Deserialize)]
pub struct CommunicatorConfig {
    /// Relay URL, e.g. `wss://relay.example.com/device`
    pub url: String,

    /// Pre-shared secret both ends sign challenges with
    pub secret: String,

    /// Hosting limit on a single connection; we reconnect before it bites
    #[serde(default = "default_max_connection_lifetime")]
    pub max_connection_lifetime_secs: u64,

    /// Interval between keep-alive pings while online
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,

    /// Delay before retrying after a failed connect or handshake
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Dispatcher backoff while offline
    #[serde(default = "default_drain_retry")]
    pub drain_retry_ms: u64,

    /// Dispatcher backoff after a send failed
    #[serde(default = "default_send_failure_backoff")]
    pub send_failure_backoff_ms: u64,

    /// Give up on a transport connect after this long
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Capacity of the inbound broadcast channel
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,

    #[serde(default)]
    pub handshake: HandshakeConfig,
}

/// Handshake timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// How long a local challenge may stay unanswered
    #[serde(default = "default_challenge_timeout")]
    pub challenge_timeout_secs: u64,

    /// Watchdog period; the initiator re-announces on every tick
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,

    /// Total handshake budget for the responder (driver)
    #[serde(default = "default_responder_deadline")]
    pub responder_deadline_secs: u64,

    /// Total handshake budget for the initiator (device)
    #[serde(default = "default_initiator_deadline")]
    pub initiator_deadline_secs: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            challenge_timeout_secs: default_challenge_timeout(),
            watchdog_interval_secs: default_watchdog_interval(),
            responder_deadline_secs: default_responder_deadline(),
            initiator_deadline_secs: default_initiator_deadline(),
        }
    }
}

impl HandshakeConfig {
    pub fn challenge_timeout(&self) -> Duration {
        Duration::from_secs(self.challenge_timeout_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    /// Deadline for the whole exchange, by role.
    pub fn deadline(&self, initiator: bool) -> Duration {
        if initiator {
            Duration::from_secs(self.initiator_deadline_secs)
        } else {
            Duration::from_secs(self.responder_deadline_secs)
        }
    }
}

// Defaults
fn default_max_connection_lifetime() -> u64 { 540 } // 9 minutes
fn default_keepalive_interval() -> u64 { 30 }
fn default_reconnect_delay() -> u64 { 1000 }
fn default_drain_retry() -> u64 { 250 }
fn default_send_failure_backoff() -> u64 { 1000 }
fn default_connect_timeout() -> u64 { 15 }
fn default_inbound_capacity() -> usize { 256 }
fn default_challenge_timeout() -> u64 { 120 }
fn default_watchdog_interval() -> u64 { 60 }
fn default_responder_deadline() -> u64 { 120 }
fn default_initiator_deadline() -> u64 { 300 }

impl CommunicatorConfig {
    /// Config with every optional field at its default.
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: secret.into(),
            max_connection_lifetime_secs: default_max_connection_lifetime(),
            keepalive_interval_secs: default_keepalive_interval(),
            reconnect_delay_ms: default_reconnect_delay(),
            drain_retry_ms: default_drain_retry(),
            send_failure_backoff_ms: default_send_failure_backoff(),
            connect_timeout_secs: default_connect_timeout(),
            inbound_capacity: default_inbound_capacity(),
            handshake: HandshakeConfig::default(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid("url cannot be empty".into()));
        }
        if self.secret.is_empty() {
            return Err(ConfigError::Invalid("secret cannot be empty".into()));
        }
        let intervals = [
            ("max_connection_lifetime_secs", self.max_connection_lifetime_secs),
            ("keepalive_interval_secs", self.keepalive_interval_secs),
            ("reconnect_delay_ms", self.reconnect_delay_ms),
            ("drain_retry_ms", self.drain_retry_ms),
            ("send_failure_backoff_ms", self.send_failure_backoff_ms),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("handshake.challenge_timeout_secs", self.handshake.challenge_timeout_secs),
            ("handshake.watchdog_interval_secs", self.handshake.watchdog_interval_secs),
            ("handshake.responder_deadline_secs", self.handshake.responder_deadline_secs),
            ("handshake.initiator_deadline_secs", self.handshake.initiator_deadline_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        if self.inbound_capacity == 0 {
            return Err(ConfigError::Invalid("inbound_capacity must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn max_connection_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_connection_lifetime_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn drain_retry(&self) -> Duration {
        Duration::from_millis(self.drain_retry_ms)
    }

    pub fn send_failure_backoff(&self) -> Duration {
        Duration::from_millis(self.send_failure_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl fmt::Debug for CommunicatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommunicatorConfig")
            .field("url", &self.url)
            .field("secret", &"<redacted>")
            .field("max_connection_lifetime_secs", &self.max_connection_lifetime_secs)
            .field("keepalive_interval_secs", &self.keepalive_interval_secs)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("drain_retry_ms", &self.drain_retry_ms)
            .field("send_failure_backoff_ms", &self.send_failure_backoff_ms)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("inbound_capacity", &self.inbound_capacity)
            .field("handshake", &self.handshake)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = CommunicatorConfig::from_toml_str(
            r#"
url = "ws://localhost:9000/device"
secret = "hunter2"
"#,
        )
        .unwrap();
        assert_eq!(config.max_connection_lifetime(), Duration::from_secs(540));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.handshake.challenge_timeout(), Duration::from_secs(120));
        assert_eq!(config.handshake.deadline(true), Duration::from_secs(300));
        assert_eq!(config.handshake.deadline(false), Duration::from_secs(120));
    }

    #[test]
    fn overrides_and_nested_table() {
        let config = CommunicatorConfig::from_toml_str(
            r#"
url = "ws://relay"
secret = "k"
keepalive_interval_secs = 5
drain_retry_ms = 100

[handshake]
watchdog_interval_secs = 10
"#,
        )
        .unwrap();
        assert_eq!(config.keepalive_interval(), Duration::from_secs(5));
        assert_eq!(config.drain_retry(), Duration::from_millis(100));
        assert_eq!(config.handshake.watchdog_interval(), Duration::from_secs(10));
        assert_eq!(config.handshake.responder_deadline_secs, 120);
    }

    #[test]
    fn rejects_invalid_values() {
        let err = CommunicatorConfig::from_toml_str("url = \"\"\nsecret = \"k\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = CommunicatorConfig::from_toml_str(
            "url = \"ws://x\"\nsecret = \"k\"\nreconnect_delay_ms = 0",
        )
        .unwrap_err();
        assert!(err.to_string().contains("reconnect_delay_ms"));

        let err = CommunicatorConfig::from_toml_str("secret = \"k\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_every_zero_timing() {
        let fields = [
            "max_connection_lifetime_secs",
            "keepalive_interval_secs",
            "reconnect_delay_ms",
            "drain_retry_ms",
            "send_failure_backoff_ms",
            "connect_timeout_secs",
        ];
        for field in fields {
            let toml = format!("url = \"ws://x\"\nsecret = \"k\"\n{field} = 0");
            let err = CommunicatorConfig::from_toml_str(&toml).unwrap_err();
            assert!(err.to_string().contains(field), "{field} accepted as zero");
        }

        let handshake = [
            "challenge_timeout_secs",
            "watchdog_interval_secs",
            "responder_deadline_secs",
            "initiator_deadline_secs",
        ];
        for field in handshake {
            let toml = format!("url = \"ws://x\"\nsecret = \"k\"\n[handshake]\n{field} = 0");
            let err = CommunicatorConfig::from_toml_str(&toml).unwrap_err();
            assert!(err.to_string().contains(field), "handshake.{field} accepted as zero");
        }
    }

    #[test]
    fn config_built_in_code_is_validated_too() {
        let mut config = CommunicatorConfig::new("ws://relay", "k");
        assert!(config.validate().is_ok());
        config.drain_retry_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "url = \"ws://relay\"\nsecret = \"k\"").unwrap();
        let config = CommunicatorConfig::load(file.path()).unwrap();
        assert_eq!(config.url, "ws://relay");

        let missing = CommunicatorConfig::load("/definitely/not/here.toml");
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn debug_hides_secret() {
        let config = CommunicatorConfig::new("ws://relay", "top-secret");
        let shown = format!("{config:?}");
        assert!(!shown.contains("top-secret"));
        assert!(shown.contains("ws://relay"));
    }
}
