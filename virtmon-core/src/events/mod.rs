//! Notification bus for consumers of the live mirror.
//!
//! Provides a publish/subscribe mechanism for entity additions and removals,
//! resource sampling and connection state changes. Notifications carry only
//! identifiers; consumers look entities up through an inventory view.
//!
//! # Example
//!
//! ```ignore
//! let bus = EventBus::new();
//!
//! // Subscribe to domain events only
//! let mut rx = bus.subscribe(vec!["domain.*".to_string()]);
//!
//! bus.publish(Notification::EntityAdded {
//!     connection_id: "sim:///default".into(),
//!     kind: EntityKind::Domain,
//!     key: "1c7a...".into(),
//! });
//!
//! while let Some(n) = rx.recv().await {
//!     println!("Received: {:?}", n);
//! }
//! ```

use crate::types::{EntityKind, RunState};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Maximum number of notifications buffered in the broadcast channel.
const EVENT_BUFFER_SIZE: usize = 1024;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Active,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// A notification fanned out to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    EntityAdded { connection_id: String, kind: EntityKind, key: String },
    EntityRemoved { connection_id: String, kind: EntityKind, key: String },
    EntityStatusChanged { connection_id: String, kind: EntityKind, key: String, status: RunState },
    ResourcesSampled { connection_id: String },
    ConnectionStateChanged { connection_id: String, state: ConnectionState },
}

impl Notification {
    /// Event type string used for filtering (e.g. "domain.added").
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::EntityAdded { kind, .. } => match kind {
                EntityKind::Domain => "domain.added",
                EntityKind::Network => "network.added",
                EntityKind::NodeDevice => "nodedev.added",
            },
            Self::EntityRemoved { kind, .. } => match kind {
                EntityKind::Domain => "domain.removed",
                EntityKind::Network => "network.removed",
                EntityKind::NodeDevice => "nodedev.removed",
            },
            Self::EntityStatusChanged { kind, .. } => match kind {
                EntityKind::Domain => "domain.status_changed",
                EntityKind::Network => "network.status_changed",
                EntityKind::NodeDevice => "nodedev.status_changed",
            },
            Self::ResourcesSampled { .. } => "connection.resources_sampled",
            Self::ConnectionStateChanged { .. } => "connection.state_changed",
        }
    }

    pub fn connection_id(&self) -> &str {
        match self {
            Self::EntityAdded { connection_id, .. }
            | Self::EntityRemoved { connection_id, .. }
            | Self::EntityStatusChanged { connection_id, .. }
            | Self::ResourcesSampled { connection_id }
            | Self::ConnectionStateChanged { connection_id, .. } => connection_id,
        }
    }

    /// Entity key, for entity notifications.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::EntityAdded { key, .. }
            | Self::EntityRemoved { key, .. }
            | Self::EntityStatusChanged { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Event bus for publishing and subscribing to notifications.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Notification>,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { sender }
    }

    /// Publish a notification to all subscribers.
    pub fn publish(&self, notification: Notification) {
        debug!(
            event_type = notification.event_type(),
            connection = notification.connection_id(),
            key = notification.key().unwrap_or(""),
            "Publishing notification"
        );
        // No subscribers is fine
        let _ = self.sender.send(notification);
    }

    /// Subscribe to notifications, optionally filtered by event type patterns.
    ///
    /// # Filter patterns
    ///
    /// - `"domain.*"` - All domain notifications
    /// - `"connection.state_changed"` - Only connection state changes
    /// - Empty list - Everything
    pub fn subscribe(&self, filters: Vec<String>) -> EventSubscriber {
        EventSubscriber { receiver: self.sender.subscribe(), filters }
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Notification subscriber with optional filtering.
pub struct EventSubscriber {
    receiver: broadcast::Receiver<Notification>,
    filters: Vec<String>,
}

impl EventSubscriber {
    /// Receive the next matching notification.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) => {
                    if self.matches(&notification) {
                        return Some(notification);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Notification subscriber lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return None;
                }
            }
        }
    }

    /// Receive the next matching notification without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.try_recv() {
                Ok(notification) => {
                    if self.matches(&notification) {
                        return Some(notification);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    debug!("Notification subscriber lagged by {} messages", n);
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<Notification> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    fn matches(&self, notification: &Notification) -> bool {
        if self.filters.is_empty() {
            return true;
        }

        let event_type = notification.event_type();
        self.filters.iter().any(|filter| {
            filter == event_type
                || filter
                    .strip_suffix(".*")
                    .is_some_and(|prefix| event_type.starts_with(&format!("{}.", prefix)))
        })
    }
}
