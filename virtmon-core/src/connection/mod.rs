//! One hypervisor session and its live mirror.
//!
//! ```text
//! DISCONNECTED --connect()--> CONNECTING --ok--> ACTIVE --close()--> DISCONNECTED
//!                                 |
//!                                 +--error--> DISCONNECTED
//! ```
//!
//! A [`Connection`] only changes its entity map inside [`Connection::tick`]
//! and [`Connection::close`]. A tick runs in two phases: everything is pulled
//! from the hypervisor first, each call bounded by the fetch timeout, and only
//! if every pull succeeded is the result committed and announced. A failed
//! tick therefore leaves the mirror exactly as it was.

mod driver;
mod view;

pub use driver::{ConnectionDriver, ConnectionHandle, DriverOptions};
pub use view::InventoryView;

use crate::client::HypervisorClient;
use crate::config::Config;
use crate::error::{Result, VirtmonError};
use crate::events::{ConnectionState, EventBus, Notification};
use crate::observability::metrics;
use crate::reconcile::{reconcile, relocate, Inventory, ReconcileOutcome};
use crate::stats::{now_secs, HostStatHistory};
use crate::types::{Entity, EntityKind, HostInfo, RawHandle, ResourceSnapshot};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use view::EntityMap;

/// Per-connection tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub history_length: usize,
    pub fetch_timeout: Duration,
    /// Consecutive failed ticks before the connection gives up.
    pub failure_threshold: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ConnectionSettings {
    fn from(config: &Config) -> Self {
        Self {
            history_length: config.history_length,
            fetch_timeout: config.fetch_timeout(),
            failure_threshold: config.failure_threshold.max(1),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickReport {
    /// The connection was not active.
    Skipped,

    /// A pull failed; nothing was changed or announced.
    Failed { error: String, disconnected: bool },

    Completed(TickSummary),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub added: usize,
    pub removed: usize,
    pub status_changes: usize,
    pub sampled: usize,
}

/// Everything a tick fetched, ready to commit.
struct Pull {
    host: HostInfo,
    outcomes: Vec<(EntityKind, ReconcileOutcome)>,
    /// `None` for entities whose handle went stale.
    snapshots: Vec<(Arc<Entity>, Option<ResourceSnapshot>)>,
    /// Entities whose object was recreated in place, with their new handle.
    relocated: Vec<(Arc<Entity>, RawHandle)>,
}

/// A hypervisor session mirrored in memory.
pub struct Connection {
    client: Arc<dyn HypervisorClient>,
    settings: ConnectionSettings,
    bus: EventBus,
    view: InventoryView,
    consecutive_failures: AtomicU32,
    // Ticks, connect and close never interleave.
    tick_lock: tokio::sync::Mutex<()>,
}

impl Connection {
    pub fn new(client: Arc<dyn HypervisorClient>, settings: ConnectionSettings, bus: EventBus) -> Self {
        let view = InventoryView {
            connection_id: Arc::from(client.uri()),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            host_info: Arc::new(RwLock::new(None)),
            entities: Arc::new(RwLock::new(EntityMap::new())),
            host_stats: Arc::new(RwLock::new(HostStatHistory::new(settings.history_length))),
        };
        Self {
            client,
            settings,
            bus,
            view,
            consecutive_failures: AtomicU32::new(0),
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        self.view.connection_id()
    }

    pub fn state(&self) -> ConnectionState {
        self.view.state()
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn client(&self) -> &Arc<dyn HypervisorClient> {
        &self.client
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn view(&self) -> InventoryView {
        self.view.clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Open the session. A no-op unless disconnected.
    #[instrument(skip(self), fields(connection = %self.id()))]
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.tick_lock.lock().await;
        if self.state() != ConnectionState::Disconnected {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        let result = match tokio::time::timeout(self.settings.fetch_timeout, self.client.open()).await {
            Ok(result) => result,
            Err(_) => Err(VirtmonError::ConnectFailed {
                uri: self.id().to_string(),
                reason: format!("timed out after {:?}", self.settings.fetch_timeout),
            }),
        };

        match result {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Release);
                self.set_state(ConnectionState::Active);
                info!("Connection active");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Connection failed");
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Drop every entity (announcing each removal) and close the session.
    #[instrument(skip(self), fields(connection = %self.id()))]
    pub async fn close(&self) -> Result<()> {
        let _guard = self.tick_lock.lock().await;
        self.close_locked().await
    }

    async fn close_locked(&self) -> Result<()> {
        if self.state() == ConnectionState::Disconnected {
            return Ok(());
        }

        let removed: Vec<Arc<Entity>> = std::mem::take(&mut *self.view.entities.write()).into_values().collect();
        for entity in &removed {
            self.bus.publish(Notification::EntityRemoved {
                connection_id: self.id().to_string(),
                kind: entity.kind(),
                key: entity.key().to_string(),
            });
        }
        self.publish_entity_counts();

        let result = match tokio::time::timeout(self.settings.fetch_timeout, self.client.close()).await {
            Ok(result) => result,
            Err(_) => Err(VirtmonError::transient("close", "timed out")),
        };
        if let Err(e) = &result {
            warn!(error = %e, "Error while closing hypervisor session");
        }

        *self.view.host_info.write() = None;
        self.consecutive_failures.store(0, Ordering::Release);
        self.set_state(ConnectionState::Disconnected);
        info!(removed = removed.len(), "Connection closed");
        result
    }

    /// Run one reconciliation and sampling cycle.
    ///
    /// Notifications go out in a fixed order: removals, additions, status
    /// changes, then a single resources-sampled (unless `skip_stats`).
    #[instrument(skip(self), fields(connection = %self.id()))]
    pub async fn tick(&self, skip_stats: bool) -> TickReport {
        let _guard = self.tick_lock.lock().await;
        if self.state() != ConnectionState::Active {
            return TickReport::Skipped;
        }

        let started = Instant::now();
        match self.pull(skip_stats).await {
            Ok(pull) => {
                self.consecutive_failures.store(0, Ordering::Release);
                let summary = self.commit(pull, skip_stats);
                metrics::record_tick(self.id(), started.elapsed().as_secs_f64());
                debug!(?summary, "Tick completed");
                TickReport::Completed(summary)
            }
            Err(e) => {
                metrics::record_tick_failure(self.id());
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                warn!(error = %e, failures, "Tick failed, mirror left untouched");

                let disconnected = failures >= self.settings.failure_threshold;
                if disconnected {
                    warn!(threshold = self.settings.failure_threshold, "Too many failed ticks, disconnecting");
                    let _ = self.close_locked().await;
                }
                TickReport::Failed { error: e.to_string(), disconnected }
            }
        }
    }

    /// Bound one hypervisor call by the fetch timeout.
    async fn fetch<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.settings.fetch_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(VirtmonError::transient(
                operation,
                format!("timed out after {:?}", self.settings.fetch_timeout),
            )),
        }
    }

    async fn pull(&self, skip_stats: bool) -> Result<Pull> {
        let client = self.client.as_ref();
        let host = self.fetch("get_host_info", client.get_host_info()).await?;

        let mut outcomes = Vec::new();
        for kind in client.supported_kinds() {
            let inventory = Inventory {
                active: self.fetch("list_active_ids", client.list_active_ids(kind)).await?,
                inactive: self.fetch("list_inactive_names", client.list_inactive_names(kind)).await?,
            };
            let previous = self.view.entities_of(kind);
            let outcome = self
                .fetch(
                    "reconcile",
                    reconcile(client, kind, &previous, &inventory, self.settings.history_length),
                )
                .await?;
            outcomes.push((kind, outcome));
        }

        let mut snapshots = Vec::new();
        let mut relocated = Vec::new();
        if !skip_stats {
            for (kind, outcome) in &outcomes {
                if !kind.reports_stats() {
                    continue;
                }
                let current = outcome
                    .retained
                    .iter()
                    .map(|r| (r.entity.clone(), r.rebind.clone()))
                    .chain(outcome.added.iter().map(|e| (e.clone(), None)));

                for (entity, rebind) in current {
                    let handle = rebind.unwrap_or_else(|| entity.handle());
                    match self.fetch("get_resource_snapshot", client.get_resource_snapshot(&handle)).await {
                        Ok(snapshot) => snapshots.push((entity, Some(snapshot))),
                        Err(e) if e.is_stale() => {
                            let snapshot = self.sample_relocated(&entity, &handle, &mut relocated).await?;
                            snapshots.push((entity, snapshot));
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        Ok(Pull { host, outcomes, snapshots, relocated })
    }

    /// The object behind `handle` was replaced under the same slot, e.g.
    /// undefined and redefined with the same key. Rebind to the new object
    /// and sample it in this pull; `None` leaves the entity marked stale.
    async fn sample_relocated(
        &self,
        entity: &Arc<Entity>,
        handle: &RawHandle,
        relocated: &mut Vec<(Arc<Entity>, RawHandle)>,
    ) -> Result<Option<ResourceSnapshot>> {
        let client = self.client.as_ref();
        let Some(fresh) = self.fetch("relocate", relocate(client, handle, entity.key())).await? else {
            debug!(key = entity.key(), %handle, "Stale handle, skipping sample");
            return Ok(None);
        };
        debug!(key = entity.key(), old = %handle, new = %fresh, "Object recreated, rebinding");
        let snapshot = match self.fetch("get_resource_snapshot", client.get_resource_snapshot(&fresh)).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) if e.is_stale() => None,
            Err(e) => return Err(e),
        };
        relocated.push((entity.clone(), fresh));
        Ok(snapshot)
    }

    fn commit(&self, pull: Pull, skip_stats: bool) -> TickSummary {
        let mut removed = Vec::new();
        let mut added = Vec::new();
        let mut status_changes = Vec::new();
        {
            let mut entities = self.view.entities.write();
            for (_, outcome) in pull.outcomes {
                for retained in &outcome.retained {
                    if let Some(handle) = &retained.rebind {
                        let before = retained.entity.state();
                        retained.entity.rebind(handle.clone());
                        // Kinds without snapshots take their status from the slot
                        if retained.entity.state() != before {
                            status_changes.push(retained.entity.clone());
                        }
                    }
                }
                for entity in outcome.removed {
                    entities.remove(&entity.entity_key());
                    removed.push(entity);
                }
                for entity in outcome.added {
                    entities.insert(entity.entity_key(), entity.clone());
                    added.push(entity);
                }
            }
        }
        for (entity, handle) in pull.relocated {
            entity.rebind(handle);
        }

        let mut sampled = 0;
        if !skip_stats {
            let now = now_secs();
            let mut active_samples = Vec::new();
            for (entity, snapshot) in &pull.snapshots {
                let Some(raw) = snapshot else {
                    entity.mark_stale();
                    continue;
                };
                let sample = entity.record(raw, &pull.host, now);
                sampled += 1;
                if entity.update_state(raw.status) {
                    status_changes.push(entity.clone());
                }
                if entity.is_active() {
                    active_samples.push(sample);
                }
            }
            self.view.host_stats.write().record(active_samples.iter(), &pull.host, now);
        }
        *self.view.host_info.write() = Some(pull.host);

        let connection_id = self.id().to_string();
        for entity in &removed {
            self.bus.publish(Notification::EntityRemoved {
                connection_id: connection_id.clone(),
                kind: entity.kind(),
                key: entity.key().to_string(),
            });
        }
        for entity in &added {
            self.bus.publish(Notification::EntityAdded {
                connection_id: connection_id.clone(),
                kind: entity.kind(),
                key: entity.key().to_string(),
            });
        }
        for entity in &status_changes {
            self.bus.publish(Notification::EntityStatusChanged {
                connection_id: connection_id.clone(),
                kind: entity.kind(),
                key: entity.key().to_string(),
                status: entity.state(),
            });
        }
        if !skip_stats {
            self.bus.publish(Notification::ResourcesSampled { connection_id });
        }

        if !removed.is_empty() || !added.is_empty() {
            self.publish_entity_counts();
        }

        TickSummary {
            added: added.len(),
            removed: removed.len(),
            status_changes: status_changes.len(),
            sampled,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        {
            let mut current = self.view.state.write();
            if *current == state {
                return;
            }
            *current = state;
        }
        metrics::record_state_change(self.id(), &state.to_string());
        self.bus.publish(Notification::ConnectionStateChanged {
            connection_id: self.id().to_string(),
            state,
        });
    }

    fn publish_entity_counts(&self) {
        let entities = self.view.entities.read();
        for kind in EntityKind::ALL {
            let count = entities.keys().filter(|k| k.kind == kind).count();
            metrics::set_entity_count(self.id(), kind.as_str(), count);
        }
    }
}
