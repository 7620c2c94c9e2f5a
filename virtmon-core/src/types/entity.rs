//! Tracked hypervisor objects.

use super::{EntityKind, HostInfo, RawHandle, ResourceSnapshot, RunState, Slot};
use crate::stats::{StatHistory, StatSample};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Map key of an entity within one connection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub key: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, key: impl Into<String>) -> Self {
        Self { kind, key: key.into() }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// A hypervisor-managed object mirrored by a connection.
///
/// The key never changes. The live handle is swapped in place when the
/// backing object moves between the active and inactive lists, so holders of
/// an `Arc<Entity>` keep seeing the same logical object.
#[derive(Debug)]
pub struct Entity {
    kind: EntityKind,
    key: String,
    name: RwLock<String>,
    handle: RwLock<RawHandle>,
    state: RwLock<RunState>,
    stats: RwLock<StatHistory>,
    stale: AtomicBool,
}

impl Entity {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        handle: RawHandle,
        history_length: usize,
    ) -> Self {
        let state = slot_state(&handle.slot);
        Self {
            kind: handle.kind,
            key: key.into(),
            name: RwLock::new(name.into()),
            handle: RwLock::new(handle),
            state: RwLock::new(state),
            stats: RwLock::new(StatHistory::new(history_length)),
            stale: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(self.kind, self.key.clone())
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Current live handle.
    pub fn handle(&self) -> RawHandle {
        self.handle.read().clone()
    }

    /// Slot the entity occupied in the last pull that touched it.
    pub fn slot(&self) -> Slot {
        self.handle.read().slot.clone()
    }

    pub fn is_active(&self) -> bool {
        self.handle.read().slot.is_active()
    }

    /// Last known (normalized) run state.
    pub fn state(&self) -> RunState {
        *self.state.read()
    }

    /// Read access to the sample history.
    pub fn stats(&self) -> RwLockReadGuard<'_, StatHistory> {
        self.stats.read()
    }

    /// Swap in a new live handle, keeping identity.
    pub(crate) fn rebind(&self, handle: RawHandle) {
        if !self.kind.reports_stats() {
            *self.state.write() = slot_state(&handle.slot);
        }
        // Inactive objects are listed by name, so the slot carries a rename
        if let Slot::Inactive(name) = &handle.slot {
            self.set_name(name.clone());
        }
        *self.handle.write() = handle;
        self.stale.store(false, Ordering::Release);
    }

    /// The hypervisor rejected the current handle; resolve it again next pull.
    pub(crate) fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub(crate) fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    fn set_name(&self, name: String) {
        *self.name.write() = name;
    }

    /// Record the new run state; returns true if it changed.
    pub(crate) fn update_state(&self, state: RunState) -> bool {
        let state = state.normalized();
        let mut current = self.state.write();
        if *current == state {
            return false;
        }
        *current = state;
        true
    }

    pub(crate) fn record(&self, raw: &ResourceSnapshot, host: &HostInfo, now: f64) -> StatSample {
        self.stats.write().record(raw, host, now)
    }
}

fn slot_state(slot: &Slot) -> RunState {
    if slot.is_active() {
        RunState::Running
    } else {
        RunState::Shutoff
    }
}
