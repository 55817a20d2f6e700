//! Connection supervisor.
//!
//! One task owns every piece of mutable engine state: the outbound queue,
//! the current connection epoch and its timers. It runs a single `select!`
//! loop, so handlers never run concurrently and need no locks.
//!
//! ```text
//! Waiting ─retry timer─▶ Connecting ─open─▶ Authenticating ─handshake ok─▶ Online
//!    ▲                        │                   │                          │
//!    └────── connect error / timeout, handshake or transport failure ───────┘
//!                             ▲                                              │
//!                             └────────────── lifetime reached ──────────────┘
//! ```
//!
//! Authenticating and Online are both `Phase::Connected`, told apart by the
//! epoch's `online` flag.
//!
//! Retiring an epoch closes its transport and drops it together with its
//! handshake, watchdog, keep-alive and forced-reconnect timer.

use futures_util::future::BoxFuture;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{Command, ConnectionState, PeerIdentity, Signer};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep};
use tracing::{debug, info, warn};

use crate::config::CommunicatorConfig;
use crate::dispatcher::{Delivery, Dispatcher};
use crate::error::TransportError;
use crate::handshake::{Handshake, Step};
use crate::keepalive::{self, KeepAlive};
use crate::router::{Connectivity, InboundRouter};
use crate::transport::{Connector, Transport};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests from the facade.
pub(crate) enum Control {
    Submit(Command),
    SendInstant(Command),
    Deactivate(oneshot::Sender<()>),
}

type ConnectAttempt = BoxFuture<'static, Result<Box<dyn Transport>, TransportError>>;

enum Phase {
    Idle,
    /// Offline, retrying when the timer fires.
    Waiting(Pin<Box<Sleep>>),
    Connecting(ConnectAttempt),
    Connected(Epoch),
}

/// Everything created by one successful connect.
struct Epoch {
    number: u64,
    transport: Box<dyn Transport>,
    handshake: Handshake,
    watchdog: Interval,
    forced_reconnect: Pin<Box<Sleep>>,
    keepalive: Option<KeepAlive>,
    online: bool,
}

enum Event {
    Control(Option<Control>),
    RetryDue,
    Connected(Result<Box<dyn Transport>, TransportError>),
    Inbound(Option<Result<String, TransportError>>),
    Watchdog,
    ForcedReconnect,
    KeepAlive,
    Drain,
}

impl Phase {
    async fn next_event(&mut self) -> Event {
        match self {
            Phase::Idle => std::future::pending().await,
            Phase::Waiting(retry) => {
                retry.as_mut().await;
                Event::RetryDue
            }
            Phase::Connecting(attempt) => Event::Connected(attempt.as_mut().await),
            Phase::Connected(epoch) => epoch.next_event().await,
        }
    }
}

impl Epoch {
    async fn next_event(&mut self) -> Event {
        tokio::select! {
            message = self.transport.recv() => Event::Inbound(message),
            _ = self.watchdog.tick(), if !self.online => Event::Watchdog,
            _ = self.forced_reconnect.as_mut() => Event::ForcedReconnect,
            _ = keepalive::tick(&mut self.keepalive) => Event::KeepAlive,
        }
    }
}

async fn send_command(
    transport: &mut dyn Transport,
    command: &Command,
) -> Result<(), TransportError> {
    let text = command
        .encode()
        .map_err(|e| TransportError::Send(e.to_string()))?;
    transport.send(text).await
}

pub(crate) struct Supervisor {
    config: Arc<CommunicatorConfig>,
    identity: PeerIdentity,
    secret: Arc<str>,
    connector: Arc<dyn Connector>,
    signer: Arc<dyn Signer>,
    control: mpsc::UnboundedReceiver<Control>,
    router: InboundRouter,
    connectivity: Arc<Connectivity>,
    dispatcher: Dispatcher,
    phase: Phase,
    epochs: u64,
}

impl Supervisor {
    pub(crate) fn new(
        config: Arc<CommunicatorConfig>,
        identity: PeerIdentity,
        connector: Arc<dyn Connector>,
        signer: Arc<dyn Signer>,
        control: mpsc::UnboundedReceiver<Control>,
        router: InboundRouter,
        connectivity: Arc<Connectivity>,
    ) -> Self {
        Self {
            secret: Arc::from(config.secret.as_str()),
            config,
            identity,
            connector,
            signer,
            control,
            router,
            connectivity,
            dispatcher: Dispatcher::new(),
            phase: Phase::Idle,
            epochs: 0,
        }
    }

    fn is_online(&self) -> bool {
        matches!(&self.phase, Phase::Connected(epoch) if epoch.online)
    }

    pub(crate) async fn run(mut self) {
        info!(identity = %self.identity, url = %self.config.url, "Communicator activated");
        self.connect().await;

        loop {
            let event = tokio::select! {
                biased;
                control = self.control.recv() => Event::Control(control),
                event = self.phase.next_event() => event,
                _ = self.dispatcher.due() => Event::Drain,
            };

            match event {
                Event::Control(Some(Control::Submit(command))) => {
                    self.dispatcher.submit(command);
                }
                Event::Control(Some(Control::SendInstant(command))) => {
                    self.send_instant(command).await;
                }
                Event::Control(Some(Control::Deactivate(done))) => {
                    self.shutdown().await;
                    let _ = done.send(());
                    return;
                }
                Event::Control(None) => {
                    debug!("Communicator dropped");
                    self.shutdown().await;
                    return;
                }
                Event::RetryDue => self.connect().await,
                Event::Connected(result) => self.on_connected(result).await,
                Event::Inbound(message) => self.on_inbound(message).await,
                Event::Watchdog => self.on_watchdog().await,
                Event::ForcedReconnect => {
                    info!(epoch = self.epochs, "Connection lifetime reached, reconnecting");
                    self.connect().await;
                }
                Event::KeepAlive => self.on_keepalive(),
                Event::Drain => self.drain().await,
            }
        }
    }

    /// Close and drop the current epoch, if any.
    async fn retire_epoch(&mut self) {
        if let Phase::Connected(mut epoch) = std::mem::replace(&mut self.phase, Phase::Idle) {
            debug!(epoch = epoch.number, "Retiring connection epoch");
            match tokio::time::timeout(CLOSE_TIMEOUT, epoch.transport.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(epoch = epoch.number, "Error closing transport: {}", e),
                Err(_) => debug!(epoch = epoch.number, "Timed out closing transport"),
            }
        }
    }

    /// Tear down whatever exists and open a new transport.
    async fn connect(&mut self) {
        self.retire_epoch().await;
        self.connectivity.notify(false);

        self.epochs += 1;
        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        let timeout = self.config.connect_timeout();
        info!(epoch = self.epochs, %url, "Connecting");

        self.phase = Phase::Connecting(Box::pin(async move {
            let attempt = tokio::time::timeout(timeout, connector.connect(&url)).await;
            match attempt {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout { url, after: timeout }),
            }
        }));
    }

    /// Tear down and try again after the short reconnect delay.
    async fn retry_later(&mut self) {
        let was_online = self.is_online();
        self.retire_epoch().await;
        if was_online {
            self.connectivity.notify(false);
        } else {
            self.connectivity.set_state(ConnectionState::Offline);
        }
        let delay = self.config.reconnect_delay();
        debug!(?delay, "Scheduling reconnect");
        self.phase = Phase::Waiting(Box::pin(sleep(delay)));
    }

    async fn on_connected(&mut self, result: Result<Box<dyn Transport>, TransportError>) {
        let mut transport = match result {
            Ok(transport) => transport,
            Err(e) => {
                warn!(epoch = self.epochs, "Connect failed: {}", e);
                self.retry_later().await;
                return;
            }
        };

        let now = Instant::now();
        let (handshake, announce) = Handshake::begin(
            self.identity.clone(),
            Arc::clone(&self.secret),
            Arc::clone(&self.signer),
            &self.config.handshake,
            now,
        );
        self.connectivity.set_state(ConnectionState::Authenticating);
        info!(epoch = self.epochs, "Transport connected, authenticating");

        if let Err(e) = send_command(transport.as_mut(), &announce).await {
            warn!(epoch = self.epochs, "Failed to send announce: {}", e);
            let _ = transport.close().await;
            self.retry_later().await;
            return;
        }

        let watchdog_period = self
            .config
            .handshake
            .watchdog_interval()
            .max(Duration::from_millis(1));
        let mut watchdog = interval_at(now + watchdog_period, watchdog_period);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.phase = Phase::Connected(Epoch {
            number: self.epochs,
            transport,
            handshake,
            watchdog,
            forced_reconnect: Box::pin(sleep(self.config.max_connection_lifetime())),
            keepalive: None,
            online: false,
        });
    }

    async fn send_on_epoch(&mut self, command: &Command) -> Result<(), TransportError> {
        match &mut self.phase {
            Phase::Connected(epoch) => send_command(epoch.transport.as_mut(), command).await,
            _ => Err(TransportError::Closed),
        }
    }

    async fn on_inbound(&mut self, message: Option<Result<String, TransportError>>) {
        let text = match message {
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                warn!(epoch = self.epochs, "Transport error: {}", e);
                self.retry_later().await;
                return;
            }
            None => {
                info!(epoch = self.epochs, "Transport closed by peer");
                self.retry_later().await;
                return;
            }
        };

        let command = match Command::decode(&text) {
            Ok(command) => command,
            Err(e) if self.is_online() => {
                warn!(epoch = self.epochs, "Dropping undecodable command: {}", e);
                return;
            }
            Err(e) => {
                warn!(
                    epoch = self.epochs,
                    "Undecodable message during handshake, reconnecting: {}", e
                );
                self.connect().await;
                return;
            }
        };

        let step = match &mut self.phase {
            Phase::Connected(epoch) => epoch.handshake.on_message(command, Instant::now()),
            _ => return,
        };

        match step {
            Ok(Step::Reply(reply)) => {
                if let Err(e) = self.send_on_epoch(&reply).await {
                    warn!(epoch = self.epochs, "Failed to answer challenge: {}", e);
                    self.retry_later().await;
                    return;
                }
            }
            Ok(Step::Route(command)) => self.router.publish(command),
            Ok(Step::Absorbed) => {}
            Err(e) => {
                warn!(epoch = self.epochs, "Handshake failed, reconnecting: {}", e);
                self.connect().await;
                return;
            }
        }

        self.maybe_go_online();
    }

    /// Flip to online once both directions of the handshake have succeeded.
    fn maybe_go_online(&mut self) {
        let Phase::Connected(epoch) = &mut self.phase else {
            return;
        };
        if epoch.online || !epoch.handshake.is_satisfied() {
            return;
        }
        epoch.online = true;
        epoch.keepalive = Some(KeepAlive::start(self.config.keepalive_interval()));
        info!(epoch = epoch.number, queued = self.dispatcher.len(), "Handshake complete, online");

        self.connectivity.notify(true);
        self.dispatcher.kick();
    }

    async fn on_watchdog(&mut self) {
        let result = match &mut self.phase {
            Phase::Connected(epoch) if !epoch.online => epoch.handshake.on_watchdog(Instant::now()),
            _ => return,
        };
        match result {
            Ok(Some(announce)) => {
                debug!(epoch = self.epochs, "Re-announcing with a fresh challenge");
                if let Err(e) = self.send_on_epoch(&announce).await {
                    warn!(epoch = self.epochs, "Failed to re-announce: {}", e);
                    self.retry_later().await;
                }
            }
            Ok(None) => debug!(epoch = self.epochs, "Still waiting for handshake"),
            Err(e) => {
                warn!(epoch = self.epochs, "Handshake failed: {}", e);
                self.retry_later().await;
            }
        }
    }

    fn on_keepalive(&mut self) {
        if self.is_online() {
            self.dispatcher.submit(Command::ping());
        }
    }

    async fn drain(&mut self) {
        let online = self.is_online();
        let command = match self.dispatcher.next(online, self.config.drain_retry()) {
            Delivery::Send(command) => command,
            Delivery::Backoff | Delivery::Idle => return,
        };

        match self.send_on_epoch(&command).await {
            Ok(()) => {
                debug!(kind = command.kind(), id = %command.id, "Delivered");
                self.dispatcher.delivered();
            }
            Err(e) => {
                warn!(kind = command.kind(), id = %command.id, "Send failed, will retry: {}", e);
                self.dispatcher
                    .failed(command, self.config.send_failure_backoff());
                self.retry_later().await;
            }
        }
    }

    async fn send_instant(&mut self, command: Command) {
        if !matches!(self.phase, Phase::Connected(_)) {
            debug!(kind = command.kind(), "No open transport, instant command lost");
            return;
        }
        if let Err(e) = self.send_on_epoch(&command).await {
            debug!(kind = command.kind(), "Instant command lost: {}", e);
        }
    }

    async fn shutdown(&mut self) {
        let discarded = self.dispatcher.discard_all();
        if discarded > 0 {
            info!(discarded, "Discarding queued commands");
        }
        self.retire_epoch().await;
        self.connectivity.notify(false);
        info!(identity = %self.identity, "Communicator deactivated");
    }
}
