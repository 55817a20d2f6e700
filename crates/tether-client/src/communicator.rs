//! Public facade.
//!
//! A [`Communicator`] is built inert, activated once and deactivated once.
//! While active it keeps a connection to the relay alive, authenticates
//! every new connection and delivers submitted commands in order.

use std::sync::{Arc, Mutex, MutexGuard};
use tether_core::{Command, ConnectionState, HmacSigner, PeerIdentity, Role, Signer};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::CommunicatorConfig;
use crate::error::{ConfigError, LifecycleError};
use crate::router::{Connectivity, InboundRouter};
use crate::supervisor::{Control, Supervisor};
use crate::transport::{Connector, WebSocketConnector};

enum Lifecycle {
    Inert,
    Active(Running),
    Deactivated,
}

struct Running {
    control: mpsc::UnboundedSender<Control>,
    router: InboundRouter,
    task: JoinHandle<()>,
}

/// One end of an authenticated command channel.
///
/// ```ignore
/// let communicator = Communicator::new(config, identity)?;
/// communicator.on_connectivity_changed(|online| println!("online: {online}"));
/// communicator.activate()?;
/// let mut inbound = communicator.subscribe()?;
/// communicator.submit(Command::custom("tap", payload));
/// ```
pub struct Communicator {
    config: Arc<CommunicatorConfig>,
    identity: PeerIdentity,
    connector: Arc<dyn Connector>,
    signer: Arc<dyn Signer>,
    connectivity: Arc<Connectivity>,
    lifecycle: Mutex<Lifecycle>,
}

impl Communicator {
    /// A communicator speaking WebSocket and signing with HMAC-SHA256.
    /// Fails if `config` does not pass [`CommunicatorConfig::validate`].
    pub fn new(config: CommunicatorConfig, identity: PeerIdentity) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            identity,
            connector: Arc::new(WebSocketConnector),
            signer: Arc::new(HmacSigner),
            connectivity: Arc::new(Connectivity::new()),
            lifecycle: Mutex::new(Lifecycle::Inert),
        })
    }

    /// Use a different transport.
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Use a different signature scheme. Both ends must agree on it.
    pub fn with_signer(mut self, signer: impl Signer + 'static) -> Self {
        self.signer = Arc::new(signer);
        self
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn role(&self) -> Role {
        self.identity.role()
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn config(&self) -> &CommunicatorConfig {
        &self.config
    }

    /// Start connecting. Must be called from within a tokio runtime.
    pub fn activate(&self) -> Result<(), LifecycleError> {
        let mut lifecycle = self.lifecycle();
        match *lifecycle {
            Lifecycle::Active(_) => return Err(LifecycleError::AlreadyActive),
            Lifecycle::Deactivated => return Err(LifecycleError::Deactivated),
            Lifecycle::Inert => {}
        }

        let (control, control_rx) = mpsc::unbounded_channel();
        let router = InboundRouter::new(self.config.inbound_capacity);
        let supervisor = Supervisor::new(
            Arc::clone(&self.config),
            self.identity.clone(),
            Arc::clone(&self.connector),
            Arc::clone(&self.signer),
            control_rx,
            router.clone(),
            Arc::clone(&self.connectivity),
        );
        let task = tokio::spawn(supervisor.run());

        *lifecycle = Lifecycle::Active(Running {
            control,
            router,
            task,
        });
        Ok(())
    }

    /// Stop for good: queued commands are discarded, the connection is
    /// closed and listeners get a final `false`. Safe to call repeatedly.
    pub async fn deactivate(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle(), Lifecycle::Deactivated);
        match previous {
            Lifecycle::Deactivated => {}
            Lifecycle::Inert => self.connectivity.notify(false),
            Lifecycle::Active(running) => {
                let (done, finished) = oneshot::channel();
                if running.control.send(Control::Deactivate(done)).is_ok() {
                    let _ = finished.await;
                }
                let _ = running.task.await;
            }
        }
    }

    /// Queue a command for delivery. Returns `false` (and drops the
    /// command) when the communicator is not active or the command could
    /// not be encoded faithfully.
    pub fn submit(&self, command: Command) -> bool {
        if let Err(e) = command.check() {
            warn!(kind = command.kind(), "Rejecting command: {}", e);
            return false;
        }
        if let Lifecycle::Active(running) = &*self.lifecycle() {
            return running.control.send(Control::Submit(command)).is_ok();
        }
        debug!(kind = command.kind(), "Communicator not active, command discarded");
        false
    }

    /// Send straight away, skipping the queue. Lost if no transport is
    /// open at that moment.
    pub fn send_instant(&self, command: Command) -> Result<(), LifecycleError> {
        match &*self.lifecycle() {
            Lifecycle::Active(running) => {
                let _ = running.control.send(Control::SendInstant(command));
                Ok(())
            }
            Lifecycle::Inert => Err(LifecycleError::NotActive),
            Lifecycle::Deactivated => Err(LifecycleError::Deactivated),
        }
    }

    /// Receive commands from the peer once the handshake is complete.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<Command>, LifecycleError> {
        match &*self.lifecycle() {
            Lifecycle::Active(running) => Ok(running.router.subscribe()),
            Lifecycle::Inert => Err(LifecycleError::NotActive),
            Lifecycle::Deactivated => Err(LifecycleError::Deactivated),
        }
    }

    /// Called with `true` when the handshake completes and `false` on every
    /// disconnect or reconnect attempt. A panicking listener is logged and
    /// otherwise ignored.
    pub fn on_connectivity_changed(&self, listener: impl Fn(bool) + Send + Sync + 'static) {
        self.connectivity.add_listener(listener);
    }

    pub fn connectivity(&self) -> watch::Receiver<ConnectionState> {
        self.connectivity.watch()
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.state() == ConnectionState::Online
    }

    pub fn is_active(&self) -> bool {
        matches!(*self.lifecycle(), Lifecycle::Active(_))
    }
}
