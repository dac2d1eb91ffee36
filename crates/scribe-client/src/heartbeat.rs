use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use scribe_core::frames::ClientFrame;

/// Periodic liveness signal for an open connection. The first tick fires a
/// full period after creation, not immediately.
pub struct HeartbeatMonitor {
    interval: Interval,
}

impl HeartbeatMonitor {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    /// Completes when the next ping is due.
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    pub fn frame(&self) -> ClientFrame {
        ClientFrame::Ping
    }
}
