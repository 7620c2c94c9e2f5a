//! Inventory reconciliation.
//!
//! Each tick pulls, per kind, the ids of the active objects and the names of
//! the inactive ones. Reconciliation diffs that pull against the entities the
//! connection already tracks and decides which are new, which are gone and
//! which are still there, while asking the hypervisor as little as possible:
//!
//! 1. Previous entities are indexed by the slot they occupied last time.
//! 2. A pulled id or name found in that index is carried forward untouched.
//! 3. Anything else is looked up and its key fetched. A known key means the
//!    object moved (for instance from the active to the inactive list); it is
//!    retained and its live handle swapped. An unknown key is a new entity.
//! 4. Previous entities not retained are removed.
//!
//! The active list is processed first, so a key showing up in both lists in
//! one pull ends up bound to its active slot.
//!
//! Active ids are assumed not to be reused for a different object between two
//! consecutive pulls, which holds for hypervisors handing out monotonic ids.

use crate::client::HypervisorClient;
use crate::error::Result;
use crate::types::{Entity, EntityKind, RawHandle, RawId, Slot};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument};

/// One kind's worth of an inventory pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub active: Vec<RawId>,
    pub inactive: Vec<String>,
}

/// An entity that survived reconciliation.
#[derive(Debug, Clone)]
pub struct Retained {
    pub entity: Arc<Entity>,
    /// New live handle, if the entity changed slot.
    pub rebind: Option<RawHandle>,
}

/// Disjoint partition of the previous and current entities of one kind.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub added: Vec<Arc<Entity>>,
    pub removed: Vec<Arc<Entity>>,
    pub retained: Vec<Retained>,
}

impl ReconcileOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Reconcile one kind. Transient client errors abort the whole call; an
/// object that vanishes between the list and the lookup is simply skipped.
#[instrument(skip(client, previous, inventory), fields(previous = previous.len()))]
pub async fn reconcile(
    client: &dyn HypervisorClient,
    kind: EntityKind,
    previous: &[Arc<Entity>],
    inventory: &Inventory,
    history_length: usize,
) -> Result<ReconcileOutcome> {
    let mut old_active: HashMap<RawId, &Arc<Entity>> = HashMap::new();
    let mut old_inactive: HashMap<String, &Arc<Entity>> = HashMap::new();
    let mut by_key: HashMap<&str, &Arc<Entity>> = HashMap::new();
    for entity in previous {
        by_key.insert(entity.key(), entity);
        if entity.is_stale() {
            continue;
        }
        match entity.slot() {
            Slot::Active(id) => old_active.insert(id, entity),
            Slot::Inactive(name) => old_inactive.insert(name, entity),
        };
    }

    let mut retained: BTreeMap<String, Retained> = BTreeMap::new();
    let mut added: BTreeMap<String, Arc<Entity>> = BTreeMap::new();

    for id in &inventory.active {
        if let Some(entity) = old_active.get(id) {
            retained.insert(entity.key().to_string(), Retained { entity: Arc::clone(*entity), rebind: None });
            continue;
        }
        let Some(handle) = skip_stale(client.lookup_by_active_id(kind, id).await)? else {
            debug!(%kind, %id, "Active object vanished before lookup");
            continue;
        };
        resolve(client, handle, &by_key, &mut retained, &mut added, history_length).await?;
    }

    for name in &inventory.inactive {
        if let Some(entity) = old_inactive.get(name) {
            // Already bound to an active slot in this pull.
            if !retained.contains_key(entity.key()) {
                retained
                    .insert(entity.key().to_string(), Retained { entity: Arc::clone(*entity), rebind: None });
            }
            continue;
        }
        let Some(handle) = skip_stale(client.lookup_by_inactive_name(kind, name).await)? else {
            debug!(%kind, %name, "Inactive object vanished before lookup");
            continue;
        };
        resolve(client, handle, &by_key, &mut retained, &mut added, history_length).await?;
    }

    let removed = previous.iter().filter(|e| !retained.contains_key(e.key())).cloned().collect();

    Ok(ReconcileOutcome {
        added: added.into_values().collect(),
        removed,
        retained: retained.into_values().collect(),
    })
}

async fn resolve(
    client: &dyn HypervisorClient,
    handle: RawHandle,
    by_key: &HashMap<&str, &Arc<Entity>>,
    retained: &mut BTreeMap<String, Retained>,
    added: &mut BTreeMap<String, Arc<Entity>>,
    history_length: usize,
) -> Result<()> {
    let Some(key) = skip_stale(client.get_key(&handle).await)? else {
        return Ok(());
    };
    if retained.contains_key(&key) || added.contains_key(&key) {
        // Same key already claimed by an earlier slot of this pull.
        return Ok(());
    }

    if let Some(entity) = by_key.get(key.as_str()) {
        debug!(%key, slot = %handle.slot, "Entity changed slot");
        retained.insert(key, Retained { entity: Arc::clone(*entity), rebind: Some(handle) });
        return Ok(());
    }

    let Some(name) = skip_stale(client.get_name(&handle).await)? else {
        return Ok(());
    };
    debug!(%key, %name, slot = %handle.slot, "New entity");
    added.insert(key.clone(), Arc::new(Entity::new(key, name, handle, history_length)));
    Ok(())
}

/// Look up whatever now occupies the slot `handle` names. Returns the fresh
/// handle only if that object still carries `key`, so an entity whose
/// object was recreated in place can be rebound within the same pull.
pub async fn relocate(client: &dyn HypervisorClient, handle: &RawHandle, key: &str) -> Result<Option<RawHandle>> {
    let lookup = match &handle.slot {
        Slot::Active(id) => client.lookup_by_active_id(handle.kind, id).await,
        Slot::Inactive(name) => client.lookup_by_inactive_name(handle.kind, name).await,
    };
    let Some(fresh) = skip_stale(lookup)? else {
        return Ok(None);
    };
    let Some(found) = skip_stale(client.get_key(&fresh).await)? else {
        return Ok(None);
    };
    if found != key {
        debug!(%key, %found, slot = %fresh.slot, "Slot now holds another object");
        return Ok(None);
    }
    Ok(Some(fresh))
}

/// Turn a stale-handle error into `None`, keeping every other error.
fn skip_stale<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_stale() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VirtmonError;
    use crate::types::{HostInfo, ResourceSnapshot};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Client whose lookups resolve through fixed tables.
    #[derive(Default)]
    struct TableClient {
        active: Mutex<HashMap<RawId, String>>,
        inactive: Mutex<HashMap<String, String>>,
        lookups: AtomicUsize,
        fail_lookups: Mutex<bool>,
    }

    impl TableClient {
        fn set(&self, active: &[(u32, &str)], inactive: &[(&str, &str)]) -> Inventory {
            *self.active.lock() = active.iter().map(|(id, key)| (RawId::Numeric(*id), key.to_string())).collect();
            *self.inactive.lock() =
                inactive.iter().map(|(name, key)| (name.to_string(), key.to_string())).collect();
            Inventory {
                active: active.iter().map(|(id, _)| RawId::Numeric(*id)).collect(),
                inactive: inactive.iter().map(|(name, _)| name.to_string()).collect(),
            }
        }
    }

    #[async_trait]
    impl HypervisorClient for TableClient {
        fn uri(&self) -> &str {
            "table://"
        }

        fn supported_kinds(&self) -> Vec<EntityKind> {
            vec![EntityKind::Domain]
        }

        async fn open(&self) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        async fn list_active_ids(&self, _kind: EntityKind) -> Result<Vec<RawId>> {
            Ok(self.active.lock().keys().cloned().collect())
        }

        async fn list_inactive_names(&self, _kind: EntityKind) -> Result<Vec<String>> {
            Ok(self.inactive.lock().keys().cloned().collect())
        }

        async fn lookup_by_active_id(&self, kind: EntityKind, id: &RawId) -> Result<RawHandle> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if *self.fail_lookups.lock() {
                return Err(VirtmonError::transient("lookup_by_active_id", "down"));
            }
            if !self.active.lock().contains_key(id) {
                return Err(VirtmonError::HandleStale { handle: id.to_string() });
            }
            Ok(RawHandle::new(kind, Slot::Active(id.clone()), 0))
        }

        async fn lookup_by_inactive_name(&self, kind: EntityKind, name: &str) -> Result<RawHandle> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(RawHandle::new(kind, Slot::Inactive(name.to_string()), 0))
        }

        async fn get_key(&self, handle: &RawHandle) -> Result<String> {
            let key = match &handle.slot {
                Slot::Active(id) => self.active.lock().get(id).cloned(),
                Slot::Inactive(name) => self.inactive.lock().get(name).cloned(),
            };
            key.ok_or_else(|| VirtmonError::HandleStale { handle: handle.to_string() })
        }

        async fn get_name(&self, handle: &RawHandle) -> Result<String> {
            Ok(format!("name-of-{}", handle.slot))
        }

        async fn get_host_info(&self) -> Result<HostInfo> {
            Ok(HostInfo { memory_kb: 1024, active_cpus: 1, max_cpus: 1 })
        }

        async fn get_resource_snapshot(&self, _handle: &RawHandle) -> Result<ResourceSnapshot> {
            Ok(ResourceSnapshot::shutoff(0))
        }
    }

    async fn run(client: &TableClient, previous: &[Arc<Entity>], inventory: &Inventory) -> ReconcileOutcome {
        reconcile(client, EntityKind::Domain, previous, inventory, 10).await.unwrap()
    }

    /// Apply an outcome the way a connection commits it.
    fn commit(outcome: &ReconcileOutcome) -> Vec<Arc<Entity>> {
        for r in &outcome.retained {
            if let Some(handle) = &r.rebind {
                r.entity.rebind(handle.clone());
            }
        }
        outcome.retained.iter().map(|r| r.entity.clone()).chain(outcome.added.iter().cloned()).collect()
    }

    fn keys(entities: &[Arc<Entity>]) -> Vec<&str> {
        entities.iter().map(|e| e.key()).collect()
    }

    #[tokio::test]
    async fn test_first_pull_adds_everything() {
        let client = TableClient::default();
        let inventory = client.set(&[(1, "vm-a")], &[("b", "vm-b")]);

        let outcome = run(&client, &[], &inventory).await;
        assert_eq!(keys(&outcome.added), vec!["vm-a", "vm-b"]);
        assert!(outcome.removed.is_empty());
        assert!(outcome.retained.is_empty());
        assert!(outcome.added[0].is_active());
        assert!(!outcome.added[1].is_active());
    }

    #[tokio::test]
    async fn test_unchanged_pull_needs_no_lookups() {
        let client = TableClient::default();
        let inventory = client.set(&[(1, "vm-a")], &[("b", "vm-b")]);
        let entities = commit(&run(&client, &[], &inventory).await);
        client.lookups.store(0, Ordering::SeqCst);

        let outcome = run(&client, &entities, &inventory).await;
        assert!(outcome.is_unchanged());
        assert_eq!(outcome.retained.len(), 2);
        assert!(outcome.retained.iter().all(|r| r.rebind.is_none()));
        assert_eq!(client.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_alternation_preserves_identity() {
        let client = TableClient::default();
        let mut entities = commit(&run(&client, &[], &client.set(&[(1, "vm-a")], &[])).await);
        let original = Arc::clone(&entities[0]);

        for round in 0..4u32 {
            let inventory = if round % 2 == 0 {
                client.set(&[], &[("a", "vm-a")])
            } else {
                client.set(&[(10 + round, "vm-a")], &[])
            };
            let outcome = run(&client, &entities, &inventory).await;
            assert!(outcome.is_unchanged(), "round {}", round);
            assert!(outcome.retained[0].rebind.is_some());
            entities = commit(&outcome);
            assert!(Arc::ptr_eq(&entities[0], &original));
            assert_eq!(entities[0].is_active(), round % 2 == 1);
        }
    }

    #[tokio::test]
    async fn test_disappearance_removes() {
        let client = TableClient::default();
        let entities = commit(&run(&client, &[], &client.set(&[(1, "vm-a"), (2, "vm-b")], &[])).await);

        let outcome = run(&client, &entities, &client.set(&[(2, "vm-b")], &[])).await;
        assert_eq!(keys(&outcome.removed), vec!["vm-a"]);
        assert!(outcome.added.is_empty());
    }

    #[tokio::test]
    async fn test_key_in_both_lists_binds_active_slot() {
        let client = TableClient::default();
        let inventory = client.set(&[(7, "vm-a")], &[("a", "vm-a")]);

        let outcome = run(&client, &[], &inventory).await;
        assert_eq!(outcome.added.len(), 1);
        assert_eq!(outcome.added[0].slot(), Slot::Active(RawId::Numeric(7)));

        // Same with a previously inactive entity.
        let entities = commit(&run(&client, &[], &client.set(&[], &[("a", "vm-a")])).await);
        let outcome = run(&client, &entities, &inventory).await;
        assert!(outcome.is_unchanged());
        assert_eq!(outcome.retained.len(), 1);
        assert_eq!(
            outcome.retained[0].rebind.as_ref().map(|h| h.slot.clone()),
            Some(Slot::Active(RawId::Numeric(7)))
        );
    }

    #[tokio::test]
    async fn test_vanished_object_is_skipped() {
        let client = TableClient::default();
        let mut inventory = client.set(&[(1, "vm-a")], &[]);
        // Listed, but gone by the time it is looked up.
        inventory.active.push(RawId::Numeric(99));

        let outcome = run(&client, &[], &inventory).await;
        assert_eq!(keys(&outcome.added), vec!["vm-a"]);
    }

    #[tokio::test]
    async fn test_transient_lookup_failure_aborts() {
        let client = TableClient::default();
        let inventory = client.set(&[(1, "vm-a")], &[]);
        *client.fail_lookups.lock() = true;

        let err = reconcile(&client, EntityKind::Domain, &[], &inventory, 10).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_stale_entity_is_looked_up_again() {
        let client = TableClient::default();
        let inventory = client.set(&[], &[("a", "vm-a")]);
        let entities = commit(&run(&client, &[], &inventory).await);
        entities[0].mark_stale();
        client.lookups.store(0, Ordering::SeqCst);

        let outcome = run(&client, &entities, &inventory).await;
        assert!(outcome.is_unchanged());
        assert!(outcome.retained[0].rebind.is_some());
        assert_eq!(client.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_relocate_checks_key_at_slot() {
        let client = TableClient::default();
        client.set(&[(3, "vm-a")], &[("b", "vm-b")]);

        let active = RawHandle::new(EntityKind::Domain, Slot::Active(RawId::Numeric(3)), 9);
        let fresh = relocate(&client, &active, "vm-a").await.unwrap();
        assert_eq!(fresh.map(|h| h.slot), Some(Slot::Active(RawId::Numeric(3))));

        // Another object took the name
        let inactive = RawHandle::new(EntityKind::Domain, Slot::Inactive("b".into()), 9);
        assert!(relocate(&client, &inactive, "vm-c").await.unwrap().is_none());

        // Nothing at the id any more
        let gone = RawHandle::new(EntityKind::Domain, Slot::Active(RawId::Numeric(4)), 9);
        assert!(relocate(&client, &gone, "vm-a").await.unwrap().is_none());

        *client.fail_lookups.lock() = true;
        assert!(relocate(&client, &active, "vm-a").await.unwrap_err().is_transient());
    }
}
