//! Health tracking for the event loop and each connection.

use crate::events::ConnectionState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Overall system health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl From<ConnectionState> for HealthStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Active => Self::Healthy,
            ConnectionState::Connecting => Self::Degraded,
            ConnectionState::Disconnected => Self::Unhealthy,
        }
    }
}

/// Health check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub version: &'static str,
    pub subsystems: Vec<SubsystemHealth>,
}

/// Subsystem health status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
}

/// Health checker that tracks subsystem status.
#[derive(Clone)]
pub struct HealthChecker {
    subsystems: Arc<RwLock<Vec<SubsystemHealth>>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self { subsystems: Arc::new(RwLock::new(Vec::new())) }
    }

    /// Register a subsystem for health tracking. Re-registering resets it.
    pub async fn register_subsystem(&self, name: String, status: HealthStatus) {
        let mut subsystems = self.subsystems.write().await;
        subsystems.retain(|s| s.name != name);
        subsystems.push(SubsystemHealth { name, status, message: None });
    }

    /// Update subsystem health status.
    pub async fn update_subsystem(
        &self,
        name: &str,
        status: HealthStatus,
        message: Option<String>,
    ) {
        let mut subsystems = self.subsystems.write().await;
        if let Some(subsystem) = subsystems.iter_mut().find(|s| s.name == name) {
            subsystem.status = status;
            subsystem.message = message;
        }
    }

    /// Mirror a connection state transition onto its subsystem.
    pub async fn connection_state_changed(&self, connection: &str, state: ConnectionState) {
        self.update_subsystem(connection, state.into(), Some(state.to_string())).await;
    }

    /// Get overall health status.
    ///
    /// Returns:
    /// - Healthy: All subsystems healthy
    /// - Degraded: At least one subsystem degraded, none unhealthy
    /// - Unhealthy: At least one subsystem unhealthy
    pub async fn get_health(&self) -> HealthCheck {
        let subsystems = self.subsystems.read().await.clone();

        let status = if subsystems.iter().any(|s| s.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if subsystems.iter().any(|s| s.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthCheck { status, version: env!("CARGO_PKG_VERSION"), subsystems }
    }

    /// Readiness check - are all subsystems healthy?
    pub async fn is_ready(&self) -> bool {
        self.get_health().await.status == HealthStatus::Healthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_checker() {
        let checker = HealthChecker::new();

        checker.register_subsystem("event-loop".to_string(), HealthStatus::Healthy).await;
        checker.register_subsystem("sim:///default".to_string(), HealthStatus::Unhealthy).await;

        let health = checker.get_health().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.subsystems.len(), 2);

        checker.connection_state_changed("sim:///default", ConnectionState::Connecting).await;
        assert_eq!(checker.get_health().await.status, HealthStatus::Degraded);

        checker.connection_state_changed("sim:///default", ConnectionState::Active).await;
        assert!(checker.is_ready().await);
    }

    #[tokio::test]
    async fn test_reregister_resets() {
        let checker = HealthChecker::new();
        checker.register_subsystem("a".to_string(), HealthStatus::Unhealthy).await;
        checker.register_subsystem("a".to_string(), HealthStatus::Healthy).await;

        let health = checker.get_health().await;
        assert_eq!(health.subsystems.len(), 1);
        assert_eq!(health.status, HealthStatus::Healthy);
    }
}
