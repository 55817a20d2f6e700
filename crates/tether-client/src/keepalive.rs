//! Keep-alive timer.

use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// Ticks once per period, starting one full period after creation.
///
/// Owned by a connection epoch; dropping the epoch stops it, so a tick can
/// never arrive for a connection that has already gone away.
pub(crate) struct KeepAlive {
    interval: Interval,
}

impl KeepAlive {
    pub(crate) fn start(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub(crate) async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Waits on an optional keep-alive; pending forever when there is none.
pub(crate) async fn tick(keepalive: &mut Option<KeepAlive>) {
    match keepalive {
        Some(keepalive) => keepalive.tick().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_tick_after_one_period() {
        let start = Instant::now();
        let mut keepalive = KeepAlive::start(Duration::from_secs(30));
        keepalive.tick().await;
        assert!(Instant::now() - start >= Duration::from_secs(30));
        keepalive.tick().await;
        assert!(Instant::now() - start >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn absent_keepalive_never_ticks() {
        let mut none = None;
        let waited = tokio::time::timeout(Duration::from_secs(600), tick(&mut none)).await;
        assert!(waited.is_err());
    }
}
