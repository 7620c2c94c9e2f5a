//! In-process hypervisor for `sim://` URIs.
//!
//! Keeps domains, networks and node devices in memory and lets callers drive
//! them through the usual lifecycle. It behaves like a remote hypervisor in
//! the ways the mirror cares about:
//!
//! - running domains get a fresh numeric id every time they start, and every
//!   slot change invalidates previously handed out handles
//! - lifecycle events arrive asynchronously, through a socket pair watched
//!   via the installed [`EventImpl`]
//! - a keepalive timer is armed through the same callbacks while open
//! - fetches can be made to fail or to stall

use super::{HypervisorClient, LifecycleEvent, LifecycleKind, LifecycleListener};
use crate::error::{Result, VirtmonError};
use crate::eventimpl::{EventImpl, EventMask, TimerId, WatchId};
use crate::types::{EntityKind, HostInfo, RawHandle, RawId, ResourceSnapshot, RunState, Slot};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Keepalive period while a session is open.
pub const KEEPALIVE_INTERVAL_MS: i64 = 5000;

const DEFAULT_HOST: HostInfo = HostInfo { memory_kb: 16 * 1024 * 1024, active_cpus: 8, max_cpus: 8 };

#[derive(Debug)]
struct SimDomain {
    name: String,
    id: Option<u32>,
    status: RunState,
    token: u64,
    max_mem_kb: u64,
    curr_mem_kb: u64,
    vcpus: u32,
    cpu_time_ns: u64,
    disk_read_bytes: u64,
    disk_write_bytes: u64,
    net_rx_bytes: u64,
    net_tx_bytes: u64,
}

impl SimDomain {
    fn snapshot(&self) -> ResourceSnapshot {
        if self.id.is_none() {
            return ResourceSnapshot::shutoff(self.max_mem_kb);
        }
        ResourceSnapshot {
            status: self.status,
            cpu_time_ns: self.cpu_time_ns,
            curr_mem_kb: self.curr_mem_kb,
            max_mem_kb: self.max_mem_kb,
            vcpu_count: self.vcpus,
            disk_read_bytes: self.disk_read_bytes,
            disk_write_bytes: self.disk_write_bytes,
            net_rx_bytes: self.net_rx_bytes,
            net_tx_bytes: self.net_tx_bytes,
        }
    }
}

#[derive(Debug)]
struct SimNetwork {
    name: String,
    active: bool,
    token: u64,
}

struct EventChannel {
    writer: UnixStream,
    reader: UnixStream,
    watch: WatchId,
    keepalive: TimerId,
}

struct SimState {
    open: bool,
    reachable: bool,
    failing_fetches: u32,
    latency: Duration,
    host: HostInfo,
    domains: BTreeMap<String, SimDomain>,
    networks: BTreeMap<String, SimNetwork>,
    node_devices: BTreeMap<String, u64>,
    next_domain_id: u32,
    next_token: u64,
    channel: Option<EventChannel>,
    pending: VecDeque<LifecycleEvent>,
}

impl SimState {
    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn emit(&mut self, kind: EntityKind, key: &str, event: LifecycleKind) {
        let Some(channel) = &self.channel else {
            return;
        };
        // One wakeup byte is enough; the reader drains the whole queue.
        if let Err(e) = (&channel.writer).write(&[1]) {
            if e.kind() != std::io::ErrorKind::WouldBlock {
                warn!(error = %e, "Failed to signal lifecycle event");
            }
        }
        self.pending.push_back(LifecycleEvent { kind, key: key.to_string(), event });
    }

    fn domain_mut(&mut self, key: &str) -> Result<&mut SimDomain> {
        self.domains.get_mut(key).ok_or_else(|| no_such("domain", key))
    }

    fn network_mut(&mut self, key: &str) -> Result<&mut SimNetwork> {
        self.networks.get_mut(key).ok_or_else(|| no_such("network", key))
    }

    /// Key and name of the object a handle still refers to.
    fn resolve(&self, handle: &RawHandle) -> Result<(&str, &str)> {
        let found = match (handle.kind, &handle.slot) {
            (EntityKind::Domain, Slot::Active(RawId::Numeric(id))) => self
                .domains
                .iter()
                .find(|(_, d)| d.id == Some(*id) && d.token == handle.token)
                .map(|(k, d)| (k.as_str(), d.name.as_str())),
            (EntityKind::Domain, Slot::Inactive(name)) => self
                .domains
                .iter()
                .find(|(_, d)| d.id.is_none() && &d.name == name && d.token == handle.token)
                .map(|(k, d)| (k.as_str(), d.name.as_str())),
            (EntityKind::Network, Slot::Active(RawId::Named(name))) => self
                .networks
                .iter()
                .find(|(_, n)| n.active && &n.name == name && n.token == handle.token)
                .map(|(k, n)| (k.as_str(), n.name.as_str())),
            (EntityKind::Network, Slot::Inactive(name)) => self
                .networks
                .iter()
                .find(|(_, n)| !n.active && &n.name == name && n.token == handle.token)
                .map(|(k, n)| (k.as_str(), n.name.as_str())),
            (EntityKind::NodeDevice, Slot::Active(RawId::Named(name))) => self
                .node_devices
                .get_key_value(name)
                .filter(|(_, token)| **token == handle.token)
                .map(|(k, _)| (k.as_str(), k.as_str())),
            _ => None,
        };
        found.ok_or_else(|| VirtmonError::HandleStale { handle: handle.to_string() })
    }
}

fn no_such(what: &str, key: &str) -> VirtmonError {
    VirtmonError::Internal(format!("no such {}: {}", what, key))
}

struct Shared {
    uri: String,
    state: Mutex<SimState>,
    event_impl: Mutex<Option<Arc<dyn EventImpl>>>,
    listener: Mutex<Option<LifecycleListener>>,
    lookups: AtomicUsize,
    key_fetches: AtomicUsize,
    keepalives: AtomicUsize,
}

impl Shared {
    /// Watch callback: drain the wakeup bytes and deliver queued events.
    fn deliver_events(&self) {
        let events: Vec<LifecycleEvent> = {
            let mut state = self.state.lock();
            if let Some(channel) = &state.channel {
                let mut buf = [0u8; 64];
                while matches!((&channel.reader).read(&mut buf), Ok(n) if n > 0) {}
            }
            state.pending.drain(..).collect()
        };
        if events.is_empty() {
            return;
        }

        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            for event in events {
                debug!(kind = %event.kind, key = %event.key, event = ?event.event, "Lifecycle event");
                listener(event);
            }
        }
    }
}

/// In-memory hypervisor. See the module docs.
#[derive(Clone)]
pub struct SimulatedHypervisor {
    shared: Arc<Shared>,
}

impl SimulatedHypervisor {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                uri: uri.into(),
                state: Mutex::new(SimState {
                    open: false,
                    reachable: true,
                    failing_fetches: 0,
                    latency: Duration::ZERO,
                    host: DEFAULT_HOST,
                    domains: BTreeMap::new(),
                    networks: BTreeMap::new(),
                    node_devices: BTreeMap::new(),
                    next_domain_id: 1,
                    next_token: 0,
                    channel: None,
                    pending: VecDeque::new(),
                }),
                event_impl: Mutex::new(None),
                listener: Mutex::new(None),
                lookups: AtomicUsize::new(0),
                key_fetches: AtomicUsize::new(0),
                keepalives: AtomicUsize::new(0),
            }),
        }
    }

    /// Two guests (one running) and an active network.
    pub fn seed_demo_inventory(&self) {
        let web = self.define_domain("web", 2 * 1024 * 1024, 2);
        self.define_domain("db", 4 * 1024 * 1024, 4);
        let _ = self.start_domain(&web);
        let net = self.define_network("default");
        let _ = self.start_network(&net);
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    pub fn set_host_info(&self, host: HostInfo) {
        self.shared.state.lock().host = host;
    }

    // Domains

    /// Define an inactive domain under a fresh UUID; returns the UUID.
    pub fn define_domain(&self, name: &str, max_mem_kb: u64, vcpus: u32) -> String {
        let key = uuid::Uuid::new_v4().to_string();
        self.define_domain_with_key(&key, name, max_mem_kb, vcpus);
        key
    }

    /// Define (or redefine) an inactive domain under `key`.
    pub fn define_domain_with_key(&self, key: &str, name: &str, max_mem_kb: u64, vcpus: u32) {
        let mut state = self.shared.state.lock();
        let token = state.token();
        state.domains.insert(
            key.to_string(),
            SimDomain {
                name: name.to_string(),
                id: None,
                status: RunState::Shutoff,
                token,
                max_mem_kb,
                curr_mem_kb: 0,
                vcpus,
                cpu_time_ns: 0,
                disk_read_bytes: 0,
                disk_write_bytes: 0,
                net_rx_bytes: 0,
                net_tx_bytes: 0,
            },
        );
        state.emit(EntityKind::Domain, key, LifecycleKind::Defined);
    }

    /// Boot a domain; returns its new numeric id.
    pub fn start_domain(&self, key: &str) -> Result<u32> {
        let mut state = self.shared.state.lock();
        if let Some(id) = state.domain_mut(key)?.id {
            return Ok(id);
        }
        let id = state.next_domain_id;
        state.next_domain_id += 1;
        let token = state.token();
        let domain = state.domain_mut(key)?;
        domain.id = Some(id);
        domain.token = token;
        domain.status = RunState::Running;
        domain.curr_mem_kb = domain.max_mem_kb;
        state.emit(EntityKind::Domain, key, LifecycleKind::Started);
        Ok(id)
    }

    /// Graceful shutdown. Counters reset, as after a real power-off.
    pub fn shutdown_domain(&self, key: &str) -> Result<()> {
        self.power_off(key)
    }

    /// Forced power-off.
    pub fn destroy_domain(&self, key: &str) -> Result<()> {
        self.power_off(key)
    }

    fn power_off(&self, key: &str) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.domain_mut(key)?.id.is_none() {
            return Ok(());
        }
        let token = state.token();
        let domain = state.domain_mut(key)?;
        domain.id = None;
        domain.token = token;
        domain.status = RunState::Shutoff;
        domain.curr_mem_kb = 0;
        domain.cpu_time_ns = 0;
        domain.disk_read_bytes = 0;
        domain.disk_write_bytes = 0;
        domain.net_rx_bytes = 0;
        domain.net_tx_bytes = 0;
        state.emit(EntityKind::Domain, key, LifecycleKind::Stopped);
        Ok(())
    }

    /// Remove a domain definition, running or not.
    pub fn undefine_domain(&self, key: &str) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.domains.remove(key).ok_or_else(|| no_such("domain", key))?;
        state.emit(EntityKind::Domain, key, LifecycleKind::Undefined);
        Ok(())
    }

    /// Change the run state of a running domain (pause, resume, crash...).
    pub fn set_domain_status(&self, key: &str, status: RunState) -> Result<()> {
        let mut state = self.shared.state.lock();
        let domain = state.domain_mut(key)?;
        if domain.id.is_none() {
            return Err(VirtmonError::Internal(format!("domain {} is not running", key)));
        }
        let previous = std::mem::replace(&mut domain.status, status);
        let event = match (previous, status) {
            (_, RunState::Paused) => Some(LifecycleKind::Suspended),
            (RunState::Paused, _) => Some(LifecycleKind::Resumed),
            _ => None,
        };
        if let Some(event) = event {
            state.emit(EntityKind::Domain, key, event);
        }
        Ok(())
    }

    /// Charge cpu time to a running domain.
    pub fn add_cpu_time(&self, key: &str, nanos: u64) -> Result<()> {
        let mut state = self.shared.state.lock();
        let domain = state.domain_mut(key)?;
        domain.cpu_time_ns = domain.cpu_time_ns.saturating_add(nanos);
        Ok(())
    }

    /// Add to the block and interface byte counters of a domain.
    pub fn add_io(&self, key: &str, disk_read: u64, disk_write: u64, net_rx: u64, net_tx: u64) -> Result<()> {
        let mut state = self.shared.state.lock();
        let domain = state.domain_mut(key)?;
        domain.disk_read_bytes = domain.disk_read_bytes.saturating_add(disk_read);
        domain.disk_write_bytes = domain.disk_write_bytes.saturating_add(disk_write);
        domain.net_rx_bytes = domain.net_rx_bytes.saturating_add(net_rx);
        domain.net_tx_bytes = domain.net_tx_bytes.saturating_add(net_tx);
        Ok(())
    }

    pub fn set_domain_memory(&self, key: &str, curr_mem_kb: u64) -> Result<()> {
        self.shared.state.lock().domain_mut(key)?.curr_mem_kb = curr_mem_kb;
        Ok(())
    }

    /// Numeric id of a running domain.
    pub fn domain_id(&self, key: &str) -> Option<u32> {
        self.shared.state.lock().domains.get(key).and_then(|d| d.id)
    }

    // Networks

    pub fn define_network(&self, name: &str) -> String {
        let key = uuid::Uuid::new_v4().to_string();
        self.define_network_with_key(&key, name);
        key
    }

    pub fn define_network_with_key(&self, key: &str, name: &str) {
        let mut state = self.shared.state.lock();
        let token = state.token();
        state.networks.insert(key.to_string(), SimNetwork { name: name.to_string(), active: false, token });
        state.emit(EntityKind::Network, key, LifecycleKind::Defined);
    }

    pub fn start_network(&self, key: &str) -> Result<()> {
        self.set_network_active(key, true)
    }

    pub fn stop_network(&self, key: &str) -> Result<()> {
        self.set_network_active(key, false)
    }

    fn set_network_active(&self, key: &str, active: bool) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.network_mut(key)?.active == active {
            return Ok(());
        }
        let token = state.token();
        let network = state.network_mut(key)?;
        network.active = active;
        network.token = token;
        let event = if active { LifecycleKind::Started } else { LifecycleKind::Stopped };
        state.emit(EntityKind::Network, key, event);
        Ok(())
    }

    pub fn undefine_network(&self, key: &str) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.networks.remove(key).ok_or_else(|| no_such("network", key))?;
        state.emit(EntityKind::Network, key, LifecycleKind::Undefined);
        Ok(())
    }

    // Node devices

    pub fn add_node_device(&self, name: &str) {
        let mut state = self.shared.state.lock();
        let token = state.token();
        state.node_devices.insert(name.to_string(), token);
        state.emit(EntityKind::NodeDevice, name, LifecycleKind::Defined);
    }

    pub fn remove_node_device(&self, name: &str) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.node_devices.remove(name).ok_or_else(|| no_such("node device", name))?;
        state.emit(EntityKind::NodeDevice, name, LifecycleKind::Undefined);
        Ok(())
    }

    // Failure injection

    /// Make the next `n` fetches fail with a transient error.
    pub fn fail_next_fetches(&self, n: u32) {
        self.shared.state.lock().failing_fetches = n;
    }

    /// An unreachable host fails every fetch and refuses to open.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.state.lock().reachable = reachable;
    }

    /// Delay every fetch by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.shared.state.lock().latency = latency;
    }

    // Counters

    /// `lookup_by_*` calls since the last reset.
    pub fn lookup_count(&self) -> usize {
        self.shared.lookups.load(Ordering::SeqCst)
    }

    /// `get_key` calls since the last reset.
    pub fn key_fetch_count(&self) -> usize {
        self.shared.key_fetches.load(Ordering::SeqCst)
    }

    /// Keepalive timer expiries.
    pub fn keepalive_count(&self) -> usize {
        self.shared.keepalives.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.shared.lookups.store(0, Ordering::SeqCst);
        self.shared.key_fetches.store(0, Ordering::SeqCst);
    }

    /// Fd watch and keepalive timer ids, while open with an event impl.
    pub fn event_registrations(&self) -> Option<(WatchId, TimerId)> {
        self.shared.state.lock().channel.as_ref().map(|c| (c.watch, c.keepalive))
    }

    async fn begin_fetch(&self, operation: &str) -> Result<()> {
        let latency = self.shared.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.shared.state.lock();
        if !state.open {
            return Err(VirtmonError::NotConnected { connection: self.shared.uri.clone() });
        }
        if !state.reachable {
            return Err(VirtmonError::transient(operation, "host unreachable"));
        }
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(VirtmonError::transient(operation, "injected failure"));
        }
        Ok(())
    }

    fn install_channel(&self, event_impl: &Arc<dyn EventImpl>) -> Result<EventChannel> {
        let connect_failed = |e: std::io::Error| VirtmonError::ConnectFailed {
            uri: self.shared.uri.clone(),
            reason: e.to_string(),
        };
        let (writer, reader) = UnixStream::pair().map_err(connect_failed)?;
        writer.set_nonblocking(true).map_err(connect_failed)?;
        reader.set_nonblocking(true).map_err(connect_failed)?;

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let watch = event_impl.add_watch(
            reader.as_raw_fd(),
            EventMask::READABLE,
            Arc::new(move |_, _, _| {
                if let Some(shared) = weak.upgrade() {
                    shared.deliver_events();
                }
            }),
        )?;

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let keepalive = match event_impl.add_timer(
            -1,
            Arc::new(move |_| {
                if let Some(shared) = weak.upgrade() {
                    shared.keepalives.fetch_add(1, Ordering::SeqCst);
                }
            }),
        ) {
            Ok(id) => id,
            Err(e) => {
                let _ = event_impl.remove_watch(watch);
                return Err(e);
            }
        };
        event_impl.update_timer(keepalive, KEEPALIVE_INTERVAL_MS);

        Ok(EventChannel { writer, reader, watch, keepalive })
    }
}

#[async_trait]
impl HypervisorClient for SimulatedHypervisor {
    fn uri(&self) -> &str {
        &self.shared.uri
    }

    fn supported_kinds(&self) -> Vec<EntityKind> {
        EntityKind::ALL.to_vec()
    }

    async fn open(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if !state.reachable {
                return Err(VirtmonError::ConnectFailed {
                    uri: self.shared.uri.clone(),
                    reason: "host unreachable".to_string(),
                });
            }
            if state.open {
                return Ok(());
            }
            state.open = true;
        }

        let event_impl = self.shared.event_impl.lock().clone();
        if let Some(event_impl) = event_impl {
            match self.install_channel(&event_impl) {
                Ok(channel) => self.shared.state.lock().channel = Some(channel),
                Err(e) => {
                    self.shared.state.lock().open = false;
                    return Err(e);
                }
            }
        }

        info!(uri = %self.shared.uri, "Simulated hypervisor opened");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let channel = {
            let mut state = self.shared.state.lock();
            if !state.open {
                return Ok(());
            }
            state.open = false;
            state.pending.clear();
            state.channel.take()
        };

        let event_impl = self.shared.event_impl.lock().clone();
        if let (Some(channel), Some(event_impl)) = (channel, event_impl) {
            event_impl.update_timer(channel.keepalive, -1);
            let _ = event_impl.remove_timer(channel.keepalive);
            let _ = event_impl.remove_watch(channel.watch);
        }

        info!(uri = %self.shared.uri, "Simulated hypervisor closed");
        Ok(())
    }

    async fn list_active_ids(&self, kind: EntityKind) -> Result<Vec<RawId>> {
        self.begin_fetch("list_active_ids").await?;
        let state = self.shared.state.lock();
        Ok(match kind {
            EntityKind::Domain => state.domains.values().filter_map(|d| d.id.map(RawId::Numeric)).collect(),
            EntityKind::Network => state
                .networks
                .values()
                .filter(|n| n.active)
                .map(|n| RawId::Named(n.name.clone()))
                .collect(),
            EntityKind::NodeDevice => state.node_devices.keys().map(|n| RawId::Named(n.clone())).collect(),
        })
    }

    async fn list_inactive_names(&self, kind: EntityKind) -> Result<Vec<String>> {
        self.begin_fetch("list_inactive_names").await?;
        let state = self.shared.state.lock();
        Ok(match kind {
            EntityKind::Domain => {
                state.domains.values().filter(|d| d.id.is_none()).map(|d| d.name.clone()).collect()
            }
            EntityKind::Network => {
                state.networks.values().filter(|n| !n.active).map(|n| n.name.clone()).collect()
            }
            EntityKind::NodeDevice => Vec::new(),
        })
    }

    async fn lookup_by_active_id(&self, kind: EntityKind, id: &RawId) -> Result<RawHandle> {
        self.begin_fetch("lookup_by_active_id").await?;
        self.shared.lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.shared.state.lock();
        let token = match (kind, id) {
            (EntityKind::Domain, RawId::Numeric(n)) => {
                state.domains.values().find(|d| d.id == Some(*n)).map(|d| d.token)
            }
            (EntityKind::Network, RawId::Named(name)) => {
                state.networks.values().find(|n| n.active && &n.name == name).map(|n| n.token)
            }
            (EntityKind::NodeDevice, RawId::Named(name)) => state.node_devices.get(name).copied(),
            _ => None,
        };
        let slot = Slot::Active(id.clone());
        token
            .map(|token| RawHandle::new(kind, slot.clone(), token))
            .ok_or_else(|| VirtmonError::HandleStale { handle: format!("{}/{}", kind, slot) })
    }

    async fn lookup_by_inactive_name(&self, kind: EntityKind, name: &str) -> Result<RawHandle> {
        self.begin_fetch("lookup_by_inactive_name").await?;
        self.shared.lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.shared.state.lock();
        let token = match kind {
            EntityKind::Domain => {
                state.domains.values().find(|d| d.id.is_none() && d.name == name).map(|d| d.token)
            }
            EntityKind::Network => {
                state.networks.values().find(|n| !n.active && n.name == name).map(|n| n.token)
            }
            EntityKind::NodeDevice => None,
        };
        let slot = Slot::Inactive(name.to_string());
        token
            .map(|token| RawHandle::new(kind, slot.clone(), token))
            .ok_or_else(|| VirtmonError::HandleStale { handle: format!("{}/{}", kind, slot) })
    }

    async fn get_key(&self, handle: &RawHandle) -> Result<String> {
        self.begin_fetch("get_key").await?;
        self.shared.key_fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.shared.state.lock();
        state.resolve(handle).map(|(key, _)| key.to_string())
    }

    async fn get_name(&self, handle: &RawHandle) -> Result<String> {
        self.begin_fetch("get_name").await?;
        let state = self.shared.state.lock();
        state.resolve(handle).map(|(_, name)| name.to_string())
    }

    async fn get_host_info(&self) -> Result<HostInfo> {
        self.begin_fetch("get_host_info").await?;
        Ok(self.shared.state.lock().host)
    }

    async fn get_resource_snapshot(&self, handle: &RawHandle) -> Result<ResourceSnapshot> {
        self.begin_fetch("get_resource_snapshot").await?;
        if handle.kind != EntityKind::Domain {
            return Err(VirtmonError::Internal(format!("{} objects have no resource counters", handle.kind)));
        }
        let state = self.shared.state.lock();
        let (key, _) = state.resolve(handle)?;
        state
            .domains
            .get(key)
            .map(SimDomain::snapshot)
            .ok_or_else(|| VirtmonError::HandleStale { handle: handle.to_string() })
    }

    fn register_event_impl(&self, event_impl: Arc<dyn EventImpl>) -> Result<()> {
        *self.shared.event_impl.lock() = Some(event_impl);
        Ok(())
    }

    fn subscribe_lifecycle(&self, listener: LifecycleListener) -> Result<bool> {
        if self.shared.event_impl.lock().is_none() {
            return Ok(false);
        }
        *self.shared.listener.lock() = Some(listener);
        Ok(true)
    }
}
