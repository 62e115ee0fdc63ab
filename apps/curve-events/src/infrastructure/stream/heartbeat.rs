//! Heartbeat Monitor
//!
//! Pings the server on a fixed interval and reports a dead connection when
//! a ping goes unanswered for longer than the configured timeout. One monitor
//! runs per connection; it is cancelled together with the connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::StreamSettings;

/// Ping cadence and answer deadline.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Time between pings.
    pub ping_interval: Duration,
    /// How long a ping may go unanswered.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Explicit cadence and deadline.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Create configuration from [`StreamSettings`].
    #[must_use]
    pub const fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            pong_timeout: settings.heartbeat_timeout,
        }
    }
}

/// What the connection loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Write a ping frame.
    SendPing,
    /// The outstanding ping expired; the connection is dead.
    Timeout {
        /// Time since the unanswered ping.
        elapsed: Duration,
    },
}

/// Liveness state of one connection.
///
/// Any inbound frame counts as proof of life, not only pongs.
#[derive(Debug, Default)]
pub struct HeartbeatState {
    outstanding_since: Mutex<Option<Instant>>,
}

impl HeartbeatState {
    /// State with no ping outstanding.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the server answered.
    pub fn record_activity(&self) {
        *self.outstanding_since.lock() = None;
    }

    /// Record a ping write. Keeps the oldest unanswered ping time.
    pub fn mark_ping_sent(&self) {
        let mut guard = self.outstanding_since.lock();
        if guard.is_none() {
            *guard = Some(Instant::now());
        }
    }

    /// Time the oldest unanswered ping has been waiting.
    #[must_use]
    pub fn waiting_for(&self) -> Option<Duration> {
        self.outstanding_since.lock().map(|since| since.elapsed())
    }
}

/// Drives the ping schedule for one connection.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Create a new monitor.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the receiver goes away, or a timeout is reported.
    pub async fn run(self) {
        // `interval_at` rejects a zero period.
        let period = self.config.ping_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let event = match self.state.waiting_for() {
                        Some(elapsed) if elapsed >= self.config.pong_timeout => {
                            tracing::warn!(
                                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                                timeout_secs = self.config.pong_timeout.as_secs(),
                                "Heartbeat timeout detected"
                            );
                            HeartbeatEvent::Timeout { elapsed }
                        }
                        _ => HeartbeatEvent::SendPing,
                    };

                    if self.event_tx.send(event).await.is_err() {
                        tracing::debug!("Connection loop gone, stopping heartbeat");
                        break;
                    }
                    if matches!(event, HeartbeatEvent::Timeout { .. }) {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_settings() {
        let settings = StreamSettings {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(7),
            ..StreamSettings::default()
        };
        let config = HeartbeatConfig::from_settings(&settings);
        assert_eq!(config.ping_interval, Duration::from_secs(5));
        assert_eq!(config.pong_timeout, Duration::from_secs(7));
    }

    #[test]
    fn state_tracks_oldest_ping() {
        let state = HeartbeatState::new();
        assert!(state.waiting_for().is_none());

        state.mark_ping_sent();
        let first = state.waiting_for().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        state.mark_ping_sent();
        assert!(state.waiting_for().unwrap() > first);

        state.record_activity();
        assert!(state.waiting_for().is_none());
    }

    #[tokio::test]
    async fn monitor_requests_pings() {
        let config = HeartbeatConfig::new(Duration::from_millis(20), Duration::from_secs(1));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatMonitor::new(config, Arc::clone(&state), event_tx, cancel.clone()).run(),
        );

        let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .expect("should receive event")
            .expect("channel should not close");
        assert_eq!(event, HeartbeatEvent::SendPing);

        cancel.cancel();
        handle.await.expect("task should complete");
    }

    #[tokio::test]
    async fn monitor_reports_unanswered_ping() {
        let config = HeartbeatConfig::new(Duration::from_millis(20), Duration::from_millis(50));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatMonitor::new(config, Arc::clone(&state), event_tx, cancel).run(),
        );

        let mut timed_out = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(500), event_rx.recv()).await
        {
            match event {
                HeartbeatEvent::SendPing => state.mark_ping_sent(),
                HeartbeatEvent::Timeout { elapsed } => {
                    assert!(elapsed >= Duration::from_millis(50));
                    timed_out = true;
                    break;
                }
            }
        }

        assert!(timed_out, "should receive timeout event");
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("monitor should exit after timeout")
            .expect("task should complete");
    }

    #[tokio::test]
    async fn answered_pings_never_time_out() {
        let config = HeartbeatConfig::new(Duration::from_millis(10), Duration::from_millis(25));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatMonitor::new(config, Arc::clone(&state), event_tx, cancel.clone()).run(),
        );

        for _ in 0..8 {
            let event = event_rx.recv().await.expect("channel open");
            assert_eq!(event, HeartbeatEvent::SendPing);
            state.mark_ping_sent();
            state.record_activity();
        }

        cancel.cancel();
        handle.await.expect("task should complete");
    }
}
