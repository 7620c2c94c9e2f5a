use crate::events::ConnectionState;
use crate::stats::HostStatHistory;
use crate::types::{Entity, EntityKey, EntityKind, HostInfo};
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::BTreeMap;
use std::sync::Arc;

pub(crate) type EntityMap = BTreeMap<EntityKey, Arc<Entity>>;

/// Read-only window onto one connection's mirror.
///
/// Cheap to clone. Entities handed out stay valid after the connection drops
/// them; they simply stop being updated.
#[derive(Clone)]
pub struct InventoryView {
    pub(crate) connection_id: Arc<str>,
    pub(crate) state: Arc<RwLock<ConnectionState>>,
    pub(crate) host_info: Arc<RwLock<Option<HostInfo>>>,
    pub(crate) entities: Arc<RwLock<EntityMap>>,
    pub(crate) host_stats: Arc<RwLock<HostStatHistory>>,
}

impl InventoryView {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Host capacity as of the last completed tick.
    pub fn host_info(&self) -> Option<HostInfo> {
        *self.host_info.read()
    }

    /// All tracked entities, ordered by kind then key.
    pub fn entities(&self) -> Vec<Arc<Entity>> {
        self.entities.read().values().cloned().collect()
    }

    pub fn entities_of(&self, kind: EntityKind) -> Vec<Arc<Entity>> {
        self.entities.read().values().filter(|e| e.kind() == kind).cloned().collect()
    }

    pub fn entity(&self, kind: EntityKind, key: &str) -> Option<Arc<Entity>> {
        self.entities.read().get(&EntityKey::new(kind, key)).cloned()
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Aggregate history over the active domains.
    pub fn host_stats(&self) -> RwLockReadGuard<'_, HostStatHistory> {
        self.host_stats.read()
    }
}
