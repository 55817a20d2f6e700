//! Fan-out of inbound commands and connectivity changes.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use tether_core::{Command, ConnectionState};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error};

/// Publishes post-handshake commands to every current subscriber.
///
/// A fresh router is created per activation, so receivers from an earlier
/// activation never see new traffic.
#[derive(Clone)]
pub(crate) struct InboundRouter {
    tx: broadcast::Sender<Command>,
}

impl InboundRouter {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Command> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, command: Command) {
        let kind = command.kind().to_string();
        if self.tx.send(command).is_err() {
            debug!(%kind, "No subscribers for inbound command");
        }
    }
}

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

/// Connectivity callbacks plus a watchable state.
pub(crate) struct Connectivity {
    listeners: Mutex<Vec<Listener>>,
    state: watch::Sender<ConnectionState>,
}

impl Connectivity {
    pub(crate) fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            state: watch::Sender::new(ConnectionState::Offline),
        }
    }

    pub(crate) fn add_listener(&self, listener: impl Fn(bool) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(listener));
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Update the state without calling listeners.
    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Update the state and tell every listener. A panicking listener is
    /// logged and skipped; it never reaches the reconnect loop.
    pub(crate) fn notify(&self, online: bool) {
        self.set_state(if online {
            ConnectionState::Online
        } else {
            ConnectionState::Offline
        });

        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(online))).is_err() {
                error!(online, "Connectivity listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn every_subscriber_gets_every_command() {
        let router = InboundRouter::new(8);
        let mut a = router.subscribe();
        let mut b = router.subscribe();

        let cmd = Command::ping();
        router.publish(cmd.clone());

        assert_eq!(a.recv().await.unwrap(), cmd);
        assert_eq!(b.recv().await.unwrap(), cmd);
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        InboundRouter::new(1).publish(Command::ping());
    }

    #[test]
    fn panicking_listener_is_isolated() {
        let connectivity = Connectivity::new();
        let calls = Arc::new(AtomicUsize::new(0));

        connectivity.add_listener(|_| panic!("listener bug"));
        let counter = Arc::clone(&calls);
        connectivity.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        connectivity.notify(true);
        connectivity.notify(false);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(connectivity.state(), ConnectionState::Offline);
    }

    #[test]
    fn watch_follows_state() {
        let connectivity = Connectivity::new();
        let rx = connectivity.watch();
        connectivity.set_state(ConnectionState::Authenticating);
        assert_eq!(*rx.borrow(), ConnectionState::Authenticating);
        connectivity.notify(true);
        assert_eq!(*rx.borrow(), ConnectionState::Online);
    }
}
