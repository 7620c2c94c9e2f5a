//! Hypervisor client abstraction.
//!
//! virtmon never speaks a hypervisor wire protocol itself. Each connection
//! talks to a [`HypervisorClient`], which lists objects, resolves them to
//! live handles and reads their resource counters. Clients that need an
//! event loop get one through [`HypervisorClient::register_event_impl`].
//!
//! Supported URI schemes:
//! - `sim://` - in-process [`SimulatedHypervisor`]

use crate::error::{Result, VirtmonError};
use crate::eventimpl::EventImpl;
use crate::types::{EntityKind, HostInfo, RawHandle, RawId, ResourceSnapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

mod simulated;

pub use simulated::SimulatedHypervisor;

/// Lifecycle transition reported by the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleKind {
    Defined,
    Undefined,
    Started,
    Stopped,
    Suspended,
    Resumed,
}

/// Asynchronous notification that an object changed on the hypervisor side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: EntityKind,
    pub key: String,
    pub event: LifecycleKind,
}

/// Receives lifecycle events, on the event loop thread.
pub type LifecycleListener = Arc<dyn Fn(LifecycleEvent) + Send + Sync>;

/// Session with one hypervisor.
///
/// Query methods may fail with `TransientFetch` (try again next tick) or
/// `HandleStale` (the object behind the handle is gone). Implementations
/// with blocking I/O must move it off the calling task.
#[async_trait]
pub trait HypervisorClient: Send + Sync {
    /// URI this client was opened for.
    fn uri(&self) -> &str;

    /// Kinds this hypervisor can list.
    fn supported_kinds(&self) -> Vec<EntityKind>;

    /// Establish the session.
    async fn open(&self) -> Result<()>;

    /// Tear the session down. Closing a closed client is a no-op.
    async fn close(&self) -> Result<()>;

    /// Ids of the running objects of `kind`.
    async fn list_active_ids(&self, kind: EntityKind) -> Result<Vec<RawId>>;

    /// Names of the defined but inactive objects of `kind`.
    async fn list_inactive_names(&self, kind: EntityKind) -> Result<Vec<String>>;

    async fn lookup_by_active_id(&self, kind: EntityKind, id: &RawId) -> Result<RawHandle>;

    async fn lookup_by_inactive_name(&self, kind: EntityKind, name: &str) -> Result<RawHandle>;

    /// Stable key: UUID for domains and networks, name for node devices.
    async fn get_key(&self, handle: &RawHandle) -> Result<String>;

    async fn get_name(&self, handle: &RawHandle) -> Result<String>;

    async fn get_host_info(&self) -> Result<HostInfo>;

    async fn get_resource_snapshot(&self, handle: &RawHandle) -> Result<ResourceSnapshot>;

    /// Install the event-injection callbacks. Called once, before `open`.
    fn register_event_impl(&self, _event_impl: Arc<dyn EventImpl>) -> Result<()> {
        Ok(())
    }

    /// Subscribe to lifecycle events. Returns false if the client cannot
    /// deliver them, in which case the caller relies on polling alone.
    fn subscribe_lifecycle(&self, _listener: LifecycleListener) -> Result<bool> {
        Ok(false)
    }
}

/// Open a client for `uri`.
///
/// `sim:///default` starts with a small demo inventory; any other `sim://`
/// URI starts empty.
#[instrument]
pub fn open_uri(uri: &str) -> Result<Arc<dyn HypervisorClient>> {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return Err(VirtmonError::UnsupportedUri { uri: uri.to_string() });
    };

    match scheme {
        "sim" => {
            let sim = SimulatedHypervisor::new(uri);
            if rest.trim_start_matches('/') == "default" {
                sim.seed_demo_inventory();
            }
            info!(uri, "Using simulated hypervisor");
            Ok(Arc::new(sim))
        }
        _ => Err(VirtmonError::UnsupportedUri { uri: uri.to_string() }),
    }
}
