//! Core domain types for virtmon.

pub mod entity;
pub mod handle;
pub mod host;
pub mod state;

// Re-exports
pub use entity::{Entity, EntityKey};
pub use handle::{RawHandle, RawId, Slot};
pub use host::{HostInfo, ResourceSnapshot};
pub use state::{EntityKind, RunState};
