//! Graceful shutdown handling for virtmond.
//!
//! Closes every connection (so subscribers see the final removals) before the
//! event loop goes away.

use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use virtmon_core::observability::health::HealthStatus;
use virtmon_core::{ConnectionHandle, EventLoop, HealthChecker};

/// Health subsystem names owned by the daemon itself.
pub const DAEMON_SUBSYSTEM: &str = "daemon";
pub const EVENT_LOOP_SUBSYSTEM: &str = "event_loop";

/// Stops connection drivers, then the event loop.
pub struct ShutdownManager {
    connections: Vec<ConnectionHandle>,
    event_loop: EventLoop,
    health: HealthChecker,
    /// How long each driver gets to close its connection
    graceful_timeout: Duration,
}

impl ShutdownManager {
    pub fn new(connections: Vec<ConnectionHandle>, event_loop: EventLoop, health: HealthChecker) -> Self {
        Self { connections, event_loop, health, graceful_timeout: Duration::from_secs(10) }
    }

    pub async fn shutdown(self) {
        info!("Starting graceful shutdown...");
        self.health
            .update_subsystem(DAEMON_SUBSYSTEM, HealthStatus::Unhealthy, Some("shutting down".to_string()))
            .await;

        for handle in &self.connections {
            info!(connection = handle.id(), "Closing connection");
            if tokio::time::timeout(self.graceful_timeout, handle.shutdown()).await.is_err() {
                warn!(connection = handle.id(), "Connection did not close in time");
            }
        }

        // The loop thread joins here; no callbacks run after this returns
        self.event_loop.shutdown();
        self.health
            .update_subsystem(EVENT_LOOP_SUBSYSTEM, HealthStatus::Unhealthy, Some("stopped".to_string()))
            .await;
        info!("Graceful shutdown complete");
    }
}

/// Create a shutdown signal receiver.
///
/// Returns a broadcast receiver that will receive a signal when
/// SIGTERM or SIGINT is received.
pub fn shutdown_signal() -> broadcast::Receiver<()> {
    let (tx, rx) = broadcast::channel(1);

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C)");
            }
            _ = terminate => {
                info!("Received SIGTERM");
            }
        }

        let _ = tx.send(());
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtmon_core::Reactor;

    #[tokio::test]
    async fn test_shutdown_reports_stopped_loop() {
        let health = HealthChecker::new();
        health.register_subsystem(DAEMON_SUBSYSTEM.to_string(), HealthStatus::Healthy).await;
        health.register_subsystem(EVENT_LOOP_SUBSYSTEM.to_string(), HealthStatus::Healthy).await;
        assert!(health.is_ready().await);

        let event_loop = EventLoop::start().unwrap();
        let loop_handle = event_loop.handle();
        ShutdownManager::new(Vec::new(), event_loop, health.clone()).shutdown().await;

        let report = health.get_health().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        let event_loop = report.subsystems.iter().find(|s| s.name == EVENT_LOOP_SUBSYSTEM).unwrap();
        assert_eq!(event_loop.status, HealthStatus::Unhealthy);
        assert_eq!(event_loop.message.as_deref(), Some("stopped"));
        let daemon = report.subsystems.iter().find(|s| s.name == DAEMON_SUBSYSTEM).unwrap();
        assert_eq!(daemon.message.as_deref(), Some("shutting down"));

        // The health entry matches what the loop actually does now
        assert!(loop_handle.post(Box::new(|| {})).is_err());
    }
}
