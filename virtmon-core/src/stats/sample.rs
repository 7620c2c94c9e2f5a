use serde::{Deserialize, Serialize};

/// A single derived metrics snapshot for one entity.
///
/// Samples are immutable once they have been pushed into a history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatSample {
    /// Unix timestamp (seconds, fractional).
    pub timestamp: f64,
    /// Cumulative guest cpu time (ns); zero while the guest is offline.
    pub cpu_time_abs_ns: u64,
    /// Cpu time consumed since the previous sample (ns).
    pub cpu_time_delta_ns: u64,
    /// Share of the whole host's cpu capacity (0-100).
    pub cpu_time_percent: f64,
    /// Share of the guest's own vcpus (0-100).
    pub cpu_guest_percent: f64,
    /// Cpu share averaged over the last few samples (0-100).
    pub cpu_time_moving_avg_percent: f64,
    pub curr_mem_kb: u64,
    pub curr_mem_percent: f64,
    pub max_mem_kb: u64,
    pub max_mem_percent: f64,
    pub vcpu_count: u32,
    /// Disk read rate (KiB/s).
    pub disk_read_rate: f64,
    /// Disk write rate (KiB/s).
    pub disk_write_rate: f64,
    /// Network receive rate (KiB/s).
    pub net_rx_rate: f64,
    /// Network transmit rate (KiB/s).
    pub net_tx_rate: f64,

    // Raw counters kept for the next rate calculation.
    pub(crate) disk_read_bytes: u64,
    pub(crate) disk_write_bytes: u64,
    pub(crate) net_rx_bytes: u64,
    pub(crate) net_tx_bytes: u64,
}

/// Selects one numeric column of a [`StatSample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatField {
    CpuTimePercent,
    CpuGuestPercent,
    CpuMovingAvgPercent,
    CurrMemKb,
    CurrMemPercent,
    MaxMemKb,
    MaxMemPercent,
    DiskReadRate,
    DiskWriteRate,
    NetRxRate,
    NetTxRate,
}

impl StatField {
    pub fn value(&self, sample: &StatSample) -> f64 {
        match self {
            Self::CpuTimePercent => sample.cpu_time_percent,
            Self::CpuGuestPercent => sample.cpu_guest_percent,
            Self::CpuMovingAvgPercent => sample.cpu_time_moving_avg_percent,
            Self::CurrMemKb => sample.curr_mem_kb as f64,
            Self::CurrMemPercent => sample.curr_mem_percent,
            Self::MaxMemKb => sample.max_mem_kb as f64,
            Self::MaxMemPercent => sample.max_mem_percent,
            Self::DiskReadRate => sample.disk_read_rate,
            Self::DiskWriteRate => sample.disk_write_rate,
            Self::NetRxRate => sample.net_rx_rate,
            Self::NetTxRate => sample.net_tx_rate,
        }
    }
}
