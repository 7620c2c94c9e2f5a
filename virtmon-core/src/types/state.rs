//! Entity kinds and run states.

use serde::{Deserialize, Serialize};

/// Kind of hypervisor-managed object being mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Virtual machine (keyed by UUID)
    Domain,

    /// Virtual network (keyed by UUID)
    Network,

    /// Host node device (keyed by name)
    NodeDevice,
}

impl EntityKind {
    /// All kinds, in the order a tick polls them.
    pub const ALL: [EntityKind; 3] = [EntityKind::Domain, EntityKind::Network, EntityKind::NodeDevice];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Network => "network",
            Self::NodeDevice => "nodedev",
        }
    }

    /// Only domains carry resource counters worth sampling.
    pub fn reports_stats(&self) -> bool {
        matches!(self, Self::Domain)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Run state as reported by the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    NoState,
    Running,
    Blocked,
    Paused,
    Shutdown,
    Shutoff,
    Crashed,
    PmSuspended,
}

impl RunState {
    /// Collapse the transient scheduler states into `Running`.
    pub fn normalized(self) -> Self {
        match self {
            Self::NoState | Self::Blocked => Self::Running,
            other => other,
        }
    }

    /// Guest is not executing and its cpu counters are meaningless.
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Shutoff | Self::Crashed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoState => "nostate",
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Paused => "paused",
            Self::Shutdown => "shutdown",
            Self::Shutoff => "shutoff",
            Self::Crashed => "crashed",
            Self::PmSuspended => "pmsuspended",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
