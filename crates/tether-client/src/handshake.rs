//! Challenge/response authentication.
//!
//! Both ends announce themselves with a random salt. Each side answers the
//! other's announce with `sign(secret, [salt, timestamp])` and checks the
//! answer to its own. The connection only counts as online once both
//! directions have succeeded:
//!
//! ```text
//!   device                              driver
//!     │── device_announce(salt_a) ──────────▶│
//!     │◀────────── driver_announce(salt_b) ──│
//!     │◀─ challenge_response(sig(salt_a)) ───│   device: signature verified
//!     │── challenge_response(sig(salt_b)) ──▶│   device: challenge responded
//! ```
//!
//! A [`Handshake`] lives exactly as long as its connection epoch. It never
//! touches the transport itself; the supervisor sends whatever it returns.

use std::sync::Arc;
use std::time::Duration;
use tether_core::{Command, CommandBody, CommandId, PeerIdentity, Role, Signer, random_salt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::HandshakeConfig;
use crate::error::HandshakeError;

/// Our own outstanding challenge.
#[derive(Debug)]
struct PendingChallenge {
    id: CommandId,
    salt: String,
    timestamp: u64,
    issued_at: Instant,
}

/// What the supervisor should do with an inbound command.
#[derive(Debug)]
pub(crate) enum Step {
    /// Send this answer to the peer's challenge.
    Reply(Command),
    /// The handshake is past the point of interest; hand to subscribers.
    Route(Command),
    /// Consumed (or dropped) by the handshake.
    Absorbed,
}

pub(crate) struct Handshake {
    identity: PeerIdentity,
    secret: Arc<str>,
    signer: Arc<dyn Signer>,
    challenge_timeout: Duration,
    deadline: Duration,
    pending: Option<PendingChallenge>,
    challenge_responded: bool,
    signature_verified: bool,
    started_at: Instant,
}

impl Handshake {
    /// Start a handshake. Returns the announce to send first.
    pub(crate) fn begin(
        identity: PeerIdentity,
        secret: Arc<str>,
        signer: Arc<dyn Signer>,
        config: &HandshakeConfig,
        now: Instant,
    ) -> (Self, Command) {
        let mut handshake = Self {
            deadline: config.deadline(identity.role().is_initiator()),
            challenge_timeout: config.challenge_timeout(),
            identity,
            secret,
            signer,
            pending: None,
            challenge_responded: false,
            signature_verified: false,
            started_at: now,
        };
        let announce = handshake.issue_challenge(now);
        (handshake, announce)
    }

    fn role(&self) -> Role {
        self.identity.role()
    }

    fn issue_challenge(&mut self, now: Instant) -> Command {
        let announce = Command::announce(&self.identity, random_salt());
        self.pending = Some(PendingChallenge {
            id: announce.id.clone(),
            salt: announce.salt().unwrap_or_default().to_string(),
            timestamp: announce.timestamp,
            issued_at: now,
        });
        announce
    }

    /// Both directions have succeeded.
    pub(crate) fn is_satisfied(&self) -> bool {
        self.challenge_responded && self.signature_verified
    }

    /// Feed one decoded inbound command.
    pub(crate) fn on_message(
        &mut self,
        command: Command,
        now: Instant,
    ) -> Result<Step, HandshakeError> {
        if command.is_announce_from(self.role().peer()) {
            return Ok(Step::Reply(self.answer(&command)?));
        }

        let Some(pending) = &self.pending else {
            return Ok(Step::Route(command));
        };

        if now.duration_since(pending.issued_at) > self.challenge_timeout {
            return Err(HandshakeError::ChallengeExpired(pending.id.to_string()));
        }

        if let CommandBody::ChallengeResponse {
            command_id,
            signature,
        } = &command.body
        {
            if *command_id == pending.id {
                let timestamp = pending.timestamp.to_string();
                if self
                    .signer
                    .verify(&self.secret, &[&pending.salt, &timestamp], signature)
                {
                    info!(role = %self.role(), "Peer signature verified");
                    self.pending = None;
                    self.signature_verified = true;
                } else {
                    warn!(role = %self.role(), challenge = %command_id, "Signature mismatch");
                }
            } else {
                debug!(challenge = %command_id, "Response to a superseded challenge");
            }
            return Ok(Step::Absorbed);
        }

        debug!(kind = command.kind(), "Dropping command received before handshake");
        Ok(Step::Absorbed)
    }

    fn answer(&mut self, challenge: &Command) -> Result<Command, HandshakeError> {
        let salt = challenge.salt().unwrap_or_default();
        let timestamp = challenge.timestamp.to_string();
        let signature = self.signer.sign(&self.secret, &[salt, &timestamp])?;
        self.challenge_responded = true;
        debug!(role = %self.role(), challenge = %challenge.id, "Answering peer challenge");
        Ok(Command::challenge_response(challenge.id.clone(), signature))
    }

    /// Periodic progress check while not yet online. The initiator gets a
    /// fresh announce to send until the peer has answered one.
    pub(crate) fn on_watchdog(&mut self, now: Instant) -> Result<Option<Command>, HandshakeError> {
        let elapsed = now.duration_since(self.started_at);
        if elapsed > self.deadline {
            return Err(HandshakeError::Timeout { elapsed });
        }
        if self.role().is_initiator() && !self.signature_verified {
            return Ok(Some(self.issue_challenge(now)));
        }
        Ok(None)
    }
}
