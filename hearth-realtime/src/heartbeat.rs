//! Heartbeat monitoring.
//!
//! Every interval each connection's liveness flag is cleared and a ping is
//! sent; a pong sets the flag again. A connection whose flag is still clear
//! at the next tick is terminated, so a silent peer is dropped after at most
//! two intervals.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::hub::{ConnectionHub, DisconnectReason};

/// Shortest tick interval. `tokio::time::interval_at` panics on a zero period.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Result of one heartbeat tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Connections that were pinged
    pub pinged: usize,
    /// Connections that were terminated
    pub terminated: usize,
}

/// Periodic liveness checker.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    hub: ConnectionHub,
    interval: Duration,
}

impl HeartbeatMonitor {
    /// Creates a monitor using the hub's configured interval.
    #[must_use]
    pub fn new(hub: ConnectionHub) -> Self {
        let interval = hub.config().heartbeat_interval().max(MIN_INTERVAL);
        Self { hub, interval }
    }

    /// Overrides the tick interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Returns the tick interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one liveness check over all connections.
    pub fn tick(&self) -> HeartbeatReport {
        let mut report = HeartbeatReport::default();

        for conn in self.hub.registry().all() {
            if !conn.take_alive() {
                if self.hub.terminate(conn.id(), DisconnectReason::HeartbeatTimeout) {
                    warn!(conn_id = %conn.id(), "Terminating unresponsive connection");
                    report.terminated += 1;
                }
                continue;
            }

            if conn.ping() {
                report.pinged += 1;
            } else if !conn.is_open() {
                // Writer is gone; nothing will ever answer
                if self.hub.disconnect(conn.id(), DisconnectReason::TransportError) {
                    report.terminated += 1;
                }
            }
        }

        if report.terminated > 0 {
            info!(
                pinged = report.pinged,
                terminated = report.terminated,
                "Heartbeat tick"
            );
        } else {
            debug!(pinged = report.pinged, "Heartbeat tick");
        }
        report
    }

    /// Ticks every interval until `shutdown` fires.
    ///
    /// The first tick happens one interval after the call.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.interval, "Heartbeat monitor started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                _ = shutdown.recv() => {
                    info!("Heartbeat monitor stopped");
                    break;
                }
            }
        }
    }

    /// Spawns [`run`](Self::run) on the runtime.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealtimeConfig;
    use crate::connection::Outbound;
    use tokio::sync::mpsc;

    fn hub() -> ConnectionHub {
        ConnectionHub::new(RealtimeConfig::default())
    }

    #[tokio::test]
    async fn test_tick_pings_live_connections() {
        let hub = hub();
        let (tx, mut rx) = mpsc::channel(8);
        let conn = hub.connect(tx, None);

        let report = hub.heartbeat().tick();

        assert_eq!(report, HeartbeatReport { pinged: 1, terminated: 0 });
        assert_eq!(rx.recv().await, Some(Outbound::Ping));
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn test_unanswered_ping_terminates_within_two_ticks() {
        let hub = hub();
        let (tx, _rx) = mpsc::channel(8);
        let conn = hub.connect(tx, None);
        hub.rooms().join(&conn, "family-42");
        let monitor = hub.heartbeat();

        assert_eq!(monitor.tick().terminated, 0);
        assert_eq!(monitor.tick().terminated, 1);

        assert_eq!(hub.connection_count(), 0);
        assert!(hub.registry().get(conn.id()).is_none());
        assert!(!hub.rooms().is_member("family-42", conn.id()));
        assert_eq!(hub.rooms().room_count(), 0);
    }

    #[tokio::test]
    async fn test_pong_keeps_connection_alive() {
        let hub = hub();
        let (tx, _rx) = mpsc::channel(8);
        let conn = hub.connect(tx, None);
        let monitor = hub.heartbeat();

        for _ in 0..5 {
            monitor.tick();
            hub.handle_pong(&conn);
        }

        assert_eq!(hub.connection_count(), 1);
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_dead_writer_is_removed() {
        let hub = hub();
        let (tx, rx) = mpsc::channel(8);
        hub.connect(tx, None);
        drop(rx);

        assert_eq!(hub.heartbeat().tick().terminated, 1);
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_shutdown() {
        let hub = hub();
        let (tx, _rx) = mpsc::channel(8);
        hub.connect(tx, None);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let monitor = hub.heartbeat().with_interval(Duration::from_secs(10));
        let handle = monitor.spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(hub.connection_count(), 0);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_interval_from_config() {
        let hub = ConnectionHub::new(RealtimeConfig {
            heartbeat_interval_secs: 7,
            ..Default::default()
        });
        assert_eq!(hub.heartbeat().interval(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let hub = ConnectionHub::new(RealtimeConfig {
            heartbeat_interval_secs: 0,
            ..Default::default()
        });
        assert_eq!(hub.heartbeat().interval(), MIN_INTERVAL);

        let monitor = hub.heartbeat().with_interval(Duration::ZERO);
        assert_eq!(monitor.interval(), MIN_INTERVAL);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = monitor.spawn(shutdown_rx);
        tokio::time::sleep(Duration::from_millis(5)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
