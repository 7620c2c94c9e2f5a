//! Host and per-object resource readings returned by the hypervisor client.

use super::RunState;
use serde::{Deserialize, Serialize};

/// Host capacity snapshot, refreshed on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Total host memory in KiB
    pub memory_kb: u64,

    /// Online processors
    pub active_cpus: u32,

    /// nodes * sockets * cores * threads
    pub max_cpus: u32,
}

/// Point-in-time resource reading for one domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub status: RunState,

    /// Cumulative cpu time consumed by the guest, in nanoseconds
    pub cpu_time_ns: u64,

    pub curr_mem_kb: u64,
    pub max_mem_kb: u64,
    pub vcpu_count: u32,

    /// Cumulative block I/O counters, in bytes
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,

    /// Cumulative interface counters, in bytes
    pub net_rx_bytes: u64,
    pub net_tx_bytes: u64,
}

impl ResourceSnapshot {
    /// Reading for a guest that is defined but not running.
    pub fn shutoff(max_mem_kb: u64) -> Self {
        Self {
            status: RunState::Shutoff,
            cpu_time_ns: 0,
            curr_mem_kb: 0,
            max_mem_kb,
            vcpu_count: 0,
            disk_read_bytes: 0,
            disk_write_bytes: 0,
            net_rx_bytes: 0,
            net_tx_bytes: 0,
        }
    }
}
