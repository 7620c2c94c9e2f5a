//! virtmon core library
//!
//! Mirrors the objects of one or more hypervisor connections in memory,
//! samples their resource usage on every tick, and announces changes on an
//! [`events::EventBus`]. Hypervisor clients that need an event loop are
//! served by [`eventimpl::EventLoopAdapter`] over a [`reactor::Reactor`].

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod eventimpl;
pub mod events;
pub mod observability;
pub mod paths;
pub mod reactor;
pub mod reconcile;
pub mod stats;
pub mod types;

// Re-export commonly used items
pub use client::{open_uri, HypervisorClient, SimulatedHypervisor};
pub use config::{Config, ConnectionConfig};
pub use connection::{
    Connection, ConnectionDriver, ConnectionHandle, ConnectionSettings, DriverOptions,
    InventoryView, TickReport, TickSummary,
};
pub use error::{Result, VirtmonError};
pub use eventimpl::{EventImpl, EventLoopAdapter, EventMask};
pub use events::{ConnectionState, EventBus, EventSubscriber, Notification};
pub use observability::{
    health::HealthChecker, init as init_observability, shutdown as shutdown_observability,
};
pub use reactor::{EventLoop, LoopHandle, Reactor};
pub use stats::{HostField, StatField};
pub use types::{Entity, EntityKind, HostInfo, RunState};
