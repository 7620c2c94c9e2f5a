//! Host-wide aggregate of the domains running on one connection.

use super::{clamp_percent, StatSample, MIN_MAX_RATE};
use crate::types::HostInfo;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Aggregate metrics for a connection at one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostSample {
    pub timestamp: f64,
    /// Memory in use by active guests (KiB).
    pub memory_kb: u64,
    pub memory_percent: f64,
    /// Cpu time consumed by active guests since the previous tick (ns).
    pub cpu_time_ns: u64,
    pub cpu_host_percent: f64,
    pub disk_read_rate: f64,
    pub disk_write_rate: f64,
    pub net_rx_rate: f64,
    pub net_tx_rate: f64,
    pub disk_max_rate: f64,
    pub net_max_rate: f64,
}

/// Selects one column of a [`HostSample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostField {
    CpuHostPercent,
    MemoryPercent,
    DiskIoRate,
    NetworkTrafficRate,
}

impl HostField {
    pub fn value(&self, sample: &HostSample) -> f64 {
        match self {
            Self::CpuHostPercent => sample.cpu_host_percent,
            Self::MemoryPercent => sample.memory_percent,
            Self::DiskIoRate => sample.disk_read_rate + sample.disk_write_rate,
            Self::NetworkTrafficRate => sample.net_rx_rate + sample.net_tx_rate,
        }
    }
}

/// Newest-first history of [`HostSample`]s.
#[derive(Debug, Clone)]
pub struct HostStatHistory {
    samples: VecDeque<HostSample>,
    capacity: usize,
}

impl HostStatHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&HostSample> {
        self.samples.front()
    }

    /// Fold this tick's samples of the *active* domains into one host sample.
    pub fn record<'a>(
        &mut self,
        active: impl IntoIterator<Item = &'a StatSample>,
        host: &HostInfo,
        now: f64,
    ) -> HostSample {
        let mut memory_kb = 0u64;
        let mut cpu_time_ns = 0u64;
        let (mut rd, mut wr, mut rx, mut tx) = (0.0, 0.0, 0.0, 0.0);
        for sample in active {
            memory_kb = memory_kb.saturating_add(sample.curr_mem_kb);
            cpu_time_ns = cpu_time_ns.saturating_add(sample.cpu_time_delta_ns);
            rd += sample.disk_read_rate;
            wr += sample.disk_write_rate;
            rx += sample.net_rx_rate;
            tx += sample.net_tx_rate;
        }

        let memory_percent = if host.memory_kb > 0 {
            clamp_percent(memory_kb as f64 * 100.0 / host.memory_kb as f64)
        } else {
            0.0
        };

        let prev = self.samples.front().copied();
        let cpu_host_percent = match prev {
            Some(p) if now > p.timestamp && host.active_cpus > 0 => clamp_percent(
                cpu_time_ns as f64 * 100.0 / ((now - p.timestamp) * 1e9 * host.active_cpus as f64),
            ),
            _ => 0.0,
        };

        let prev_disk_max = prev.map(|p| p.disk_max_rate).unwrap_or(MIN_MAX_RATE);
        let prev_net_max = prev.map(|p| p.net_max_rate).unwrap_or(MIN_MAX_RATE);

        let sample = HostSample {
            timestamp: now,
            memory_kb,
            memory_percent,
            cpu_time_ns,
            cpu_host_percent,
            disk_read_rate: rd,
            disk_write_rate: wr,
            net_rx_rate: rx,
            net_tx_rate: tx,
            disk_max_rate: prev_disk_max.max(rd).max(wr),
            net_max_rate: prev_net_max.max(rx).max(tx),
        };
        self.samples.push_front(sample);
        self.samples.truncate(self.capacity);
        sample
    }

    pub fn current(&self, field: HostField) -> f64 {
        self.latest().map(|s| field.value(s)).unwrap_or(0.0)
    }

    /// Newest-first copy of one column, zero-padded to `capacity + 1`.
    pub fn vector(&self, field: HostField, limit: Option<usize>) -> Vec<f64> {
        let mut len = self.capacity + 1;
        if let Some(limit) = limit {
            len = len.min(limit);
        }
        (0..len).map(|i| self.samples.get(i).map(|s| field.value(s)).unwrap_or(0.0)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatHistory;
    use crate::types::{ResourceSnapshot, RunState};

    #[test]
    fn test_aggregates_active_domains() {
        let host = HostInfo { memory_kb: 4000, active_cpus: 4, max_cpus: 4 };
        let raw = |cpu: u64, mem: u64| ResourceSnapshot {
            status: RunState::Running,
            cpu_time_ns: cpu,
            curr_mem_kb: mem,
            max_mem_kb: mem,
            vcpu_count: 2,
            disk_read_bytes: 0,
            disk_write_bytes: 0,
            net_rx_bytes: 0,
            net_tx_bytes: 0,
        };

        let mut a = StatHistory::new(10);
        let mut b = StatHistory::new(10);
        let mut hosts = HostStatHistory::new(10);

        let first = [a.record(&raw(0, 1000), &host, 0.0), b.record(&raw(0, 1000), &host, 0.0)];
        let sample = hosts.record(first.iter(), &host, 0.0);
        assert_eq!(sample.memory_percent, 50.0);
        assert_eq!(sample.cpu_host_percent, 0.0);

        let second = [
            a.record(&raw(1_000_000_000, 1000), &host, 1.0),
            b.record(&raw(1_000_000_000, 3000), &host, 1.0),
        ];
        let sample = hosts.record(second.iter(), &host, 1.0);
        // two cpu-seconds on a 4-cpu host over one second
        assert_eq!(sample.cpu_host_percent, 50.0);
        // 4000 KiB of 4000 KiB, clamped at 100
        assert_eq!(sample.memory_percent, 100.0);
        assert_eq!(hosts.vector(HostField::CpuHostPercent, Some(3)), vec![50.0, 0.0, 0.0]);
    }
}
