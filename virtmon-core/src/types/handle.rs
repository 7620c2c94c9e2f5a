//! Opaque references into the hypervisor's object namespace.

use super::EntityKind;
use serde::{Deserialize, Serialize};

/// Identifier of an active object as listed by the hypervisor.
///
/// Domains are listed by numeric id, networks and node devices by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RawId {
    Numeric(u32),
    Named(String),
}

impl std::fmt::Display for RawId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawId::Numeric(id) => write!(f, "{}", id),
            RawId::Named(name) => write!(f, "{}", name),
        }
    }
}

impl From<u32> for RawId {
    fn from(id: u32) -> Self {
        RawId::Numeric(id)
    }
}

impl From<&str> for RawId {
    fn from(name: &str) -> Self {
        RawId::Named(name.to_string())
    }
}

/// Where an object showed up in an inventory pull.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    /// Listed among the active objects
    Active(RawId),

    /// Listed among the defined-but-inactive objects, by name
    Inactive(String),
}

impl Slot {
    pub fn is_active(&self) -> bool {
        matches!(self, Slot::Active(_))
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Active(id) => write!(f, "active:{}", id),
            Slot::Inactive(name) => write!(f, "inactive:{}", name),
        }
    }
}

/// Live handle on a hypervisor-side object.
///
/// `token` is chosen by the client and lets it recognise a handle whose
/// object has since been destroyed or replaced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawHandle {
    pub kind: EntityKind,
    pub slot: Slot,
    pub token: u64,
}

impl RawHandle {
    pub fn new(kind: EntityKind, slot: Slot, token: u64) -> Self {
        Self { kind, slot, token }
    }
}

impl std::fmt::Display for RawHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.kind, self.slot, self.token)
    }
}
