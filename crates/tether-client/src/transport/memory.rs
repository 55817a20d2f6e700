//! In-process transport.
//!
//! Every successful `connect` hands the far end of the pipe to whoever is
//! waiting in [`MemoryConnector::accept`], so a test (or an embedded relay)
//! can play the peer without touching the network.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tether_core::Command;
use tokio::sync::{Mutex, mpsc};

use super::{Connector, Transport};
use crate::error::TransportError;

struct Shared {
    reachable: AtomicBool,
    stalled: AtomicBool,
    attempts: AtomicUsize,
    failing_sends: AtomicUsize,
    accepted_tx: mpsc::UnboundedSender<MemoryPeer>,
    accepted_rx: Mutex<mpsc::UnboundedReceiver<MemoryPeer>>,
}

/// Connector producing in-memory transport pairs.
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                reachable: AtomicBool::new(true),
                stalled: AtomicBool::new(false),
                attempts: AtomicUsize::new(0),
                failing_sends: AtomicUsize::new(0),
                accepted_tx,
                accepted_rx: Mutex::new(accepted_rx),
            }),
        }
    }

    /// When unreachable, every connect fails immediately.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
    }

    /// When stalled, connects never complete.
    pub fn set_stalled(&self, stalled: bool) {
        self.shared.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Make the next `n` sends on any transport fail.
    pub fn fail_next_sends(&self, n: usize) {
        self.shared.failing_sends.store(n, Ordering::SeqCst);
    }

    /// Connect attempts so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next successful connect and return the far end.
    pub async fn accept(&self) -> Option<MemoryPeer> {
        self.shared.accepted_rx.lock().await.recv().await
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        if self.shared.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.shared.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                url: url.to_string(),
                reason: "host unreachable".into(),
            });
        }

        let (to_local_tx, to_local_rx) = mpsc::unbounded_channel();
        let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.to_string(),
            tx: to_local_tx,
            rx: to_peer_rx,
        };
        self.shared
            .accepted_tx
            .send(peer)
            .map_err(|_| TransportError::Closed)?;

        Ok(Box::new(MemoryTransport {
            shared: Arc::clone(&self.shared),
            tx: Some(to_peer_tx),
            rx: to_local_rx,
        }))
    }
}

struct MemoryTransport {
    shared: Arc<Shared>,
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let failing = self
            .shared
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(TransportError::Send("injected failure".into()));
        }
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(text).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

/// The far end of an in-memory transport.
pub struct MemoryPeer {
    url: String,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// URL the local side connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver raw text to the local side.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.tx.send(text.into()).map_err(|_| TransportError::Closed)
    }

    /// Deliver a command to the local side.
    pub fn send(&self, command: &Command) -> Result<(), TransportError> {
        let text = command
            .encode()
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.send_text(text)
    }

    /// Next raw frame from the local side; `None` once it has closed.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Next frame from the local side, decoded. Undecodable frames are
    /// skipped.
    pub async fn recv(&mut self) -> Option<Command> {
        loop {
            let text = self.rx.recv().await?;
            if let Ok(command) = Command::decode(&text) {
                return Some(command);
            }
        }
    }

    /// Frame already sent by the local side, without waiting.
    pub fn try_recv(&mut self) -> Option<Command> {
        while let Ok(text) = self.rx.try_recv() {
            if let Ok(command) = Command::decode(&text) {
                return Some(command);
            }
        }
        None
    }

    /// Whether the local side has closed its end.
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}
