#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_client::{
    Command, CommandBody, Communicator, CommunicatorConfig, ConnectionState, DeviceDescriptor,
    DriverDescriptor, HmacSigner, MemoryConnector, MemoryPeer, PeerIdentity, Signer,
};
use tether_core::random_salt;

pub const SECRET: &str = "shared-secret";

pub fn config() -> CommunicatorConfig {
    CommunicatorConfig::new("memory://relay", SECRET)
}

pub fn device_identity() -> PeerIdentity {
    PeerIdentity::Device(DeviceDescriptor {
        id: "emulator-5554".into(),
        name: "Pixel 8".into(),
        platform: "android".into(),
        os_version: Some("14".into()),
    })
}

pub fn driver_identity() -> PeerIdentity {
    PeerIdentity::Driver(DriverDescriptor {
        id: "runner-1".into(),
        name: "ci".into(),
        app_id: "com.example.shop".into(),
    })
}

pub fn custom(kind: &str) -> Command {
    Command::custom(kind, Default::default())
}

/// Every connectivity callback, in order.
pub fn record(communicator: &Communicator) -> Arc<Mutex<Vec<bool>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    communicator.on_connectivity_changed(move |online| sink.lock().unwrap().push(online));
    events
}

pub fn events(recorded: &Arc<Mutex<Vec<bool>>>) -> Vec<bool> {
    recorded.lock().unwrap().clone()
}

pub async fn accept(connector: &MemoryConnector) -> MemoryPeer {
    tokio::time::timeout(Duration::from_secs(5), connector.accept())
        .await
        .expect("no connection attempt")
        .expect("connector closed")
}

pub async fn next(peer: &mut MemoryPeer) -> Command {
    tokio::time::timeout(Duration::from_secs(5), peer.recv())
        .await
        .expect("nothing received")
        .expect("transport closed")
}

/// Next command that is not a keep-alive.
pub async fn next_non_ping(peer: &mut MemoryPeer) -> Command {
    loop {
        let command = next(peer).await;
        if command.body != CommandBody::Ping {
            return command;
        }
    }
}

/// Answer the local side's announce the way an honest peer would.
pub fn answer(peer: &MemoryPeer, announce: &Command) {
    let salt = announce.salt().expect("announce carries a salt");
    let signature = HmacSigner
        .sign(SECRET, &[salt, &announce.timestamp.to_string()])
        .unwrap();
    peer.send(&Command::challenge_response(announce.id.clone(), signature))
        .unwrap();
}

/// Challenge the local side and check its answer.
pub async fn challenge(peer: &mut MemoryPeer, remote: &PeerIdentity) {
    let challenge = Command::announce(remote, random_salt());
    peer.send(&challenge).unwrap();

    let response = next_non_ping(peer).await;
    match response.body {
        CommandBody::ChallengeResponse {
            command_id,
            signature,
        } => {
            assert_eq!(command_id, challenge.id);
            let salt = challenge.salt().unwrap();
            let timestamp = challenge.timestamp.to_string();
            assert!(HmacSigner.verify(SECRET, &[salt, &timestamp], &signature));
        }
        other => panic!("expected a challenge response, got {other:?}"),
    }
}

/// Run the remote half of the handshake on a fresh connection.
pub async fn complete_handshake(peer: &mut MemoryPeer, remote: &PeerIdentity) {
    let announce = next(peer).await;
    assert!(announce.is_announce_from(remote.role().peer()));
    answer(peer, &announce);
    challenge(peer, remote).await;
}

pub async fn wait_online(communicator: &Communicator) {
    let mut state = communicator.connectivity();
    let reached = matches!(
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::Online)
        )
        .await,
        Ok(Ok(_))
    );
    assert!(reached, "communicator never came online");
}

/// Forward frames between two in-memory peers until either side closes.
pub async fn bridge(mut a: MemoryPeer, mut b: MemoryPeer) {
    loop {
        let (text, to_b) = tokio::select! {
            text = a.recv_text() => (text, true),
            text = b.recv_text() => (text, false),
        };
        let Some(text) = text else { break };
        let delivered = if to_b { b.send_text(text) } else { a.send_text(text) };
        if delivered.is_err() {
            break;
        }
    }
}
