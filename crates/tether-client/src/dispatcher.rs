//! Ordered outbound queue.
//!
//! Commands leave in submission order, one at a time, and only while the
//! connection is online. The queue survives reconnects; only deactivation
//! empties it.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tether_core::Command;
use tokio::time::{Instant, Sleep, sleep_until};

/// Outcome of one drain attempt.
#[derive(Debug)]
pub(crate) enum Delivery {
    /// Send this command now.
    Send(Command),
    /// Offline; a retry is scheduled.
    Backoff,
    /// Nothing queued.
    Idle,
}

#[derive(Default)]
pub(crate) struct Dispatcher {
    queue: VecDeque<Command>,
    drain: Option<Pin<Box<Sleep>>>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn submit(&mut self, command: Command) {
        self.queue.push_back(command);
        self.schedule(Duration::ZERO);
    }

    /// Drain as soon as possible, if anything is queued.
    pub(crate) fn kick(&mut self) {
        if !self.queue.is_empty() {
            self.schedule(Duration::ZERO);
        }
    }

    /// Arm the drain timer unless an earlier drain is already due.
    fn schedule(&mut self, delay: Duration) {
        let deadline = Instant::now() + delay;
        match self.drain.as_mut() {
            Some(sleep) if sleep.deadline() <= deadline => {}
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.drain = Some(Box::pin(sleep_until(deadline))),
        }
    }

    /// Resolves when a drain attempt is due. Pending forever when idle.
    pub(crate) async fn due(&mut self) {
        match self.drain.as_mut() {
            Some(sleep) => sleep.as_mut().await,
            None => std::future::pending().await,
        }
        self.drain = None;
    }

    /// Take the head of the queue if it can go out now.
    pub(crate) fn next(&mut self, online: bool, retry: Duration) -> Delivery {
        if self.queue.is_empty() {
            self.drain = None;
            return Delivery::Idle;
        }
        if !online {
            self.schedule(retry);
            return Delivery::Backoff;
        }
        match self.queue.pop_front() {
            Some(command) => Delivery::Send(command),
            None => Delivery::Idle,
        }
    }

    /// The last command went out; keep going.
    pub(crate) fn delivered(&mut self) {
        self.kick();
    }

    /// The last command did not go out. It goes back to the head and the
    /// next attempt waits `backoff`.
    pub(crate) fn failed(&mut self, command: Command, backoff: Duration) {
        self.queue.push_front(command);
        self.drain = None;
        self.schedule(backoff);
    }

    /// Drop everything. Returns how many commands were discarded.
    pub(crate) fn discard_all(&mut self) -> usize {
        self.drain = None;
        let discarded = self.queue.len();
        self.queue.clear();
        discarded
    }
}
