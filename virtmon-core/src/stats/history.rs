//! Bounded per-entity sample history.

use super::{clamp_percent, kib_rate, StatField, StatSample, MIN_MAX_RATE};
use crate::types::{HostInfo, ResourceSnapshot};
use std::collections::VecDeque;

/// Number of samples (newest included) the cpu moving average spans.
pub const MOVING_AVERAGE_WINDOW: usize = 5;

/// Newest-first ring of [`StatSample`]s with a fixed capacity.
#[derive(Debug, Clone)]
pub struct StatHistory {
    samples: VecDeque<StatSample>,
    capacity: usize,
    disk_read_max_rate: f64,
    disk_write_max_rate: f64,
    net_rx_max_rate: f64,
    net_tx_max_rate: f64,
}

impl StatHistory {
    /// Create an empty history holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            disk_read_max_rate: MIN_MAX_RATE,
            disk_write_max_rate: MIN_MAX_RATE,
            net_rx_max_rate: MIN_MAX_RATE,
            net_tx_max_rate: MIN_MAX_RATE,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most recent sample.
    pub fn latest(&self) -> Option<&StatSample> {
        self.samples.front()
    }

    /// Samples, newest first.
    pub fn samples(&self) -> impl Iterator<Item = &StatSample> {
        self.samples.iter()
    }

    /// Derive a sample from a raw reading and push it to the front.
    ///
    /// `now` is the sampling wall-clock time in seconds.
    pub fn record(&mut self, raw: &ResourceSnapshot, host: &HostInfo, now: f64) -> StatSample {
        let offline = raw.status.is_offline();
        let (cpu_time_abs_ns, vcpu_count) =
            if offline { (0, 0) } else { (raw.cpu_time_ns, raw.vcpu_count) };
        let host_cpus = host.active_cpus as f64;

        let prev = self.samples.front().copied();
        let elapsed = prev.map(|p| now - p.timestamp).unwrap_or(0.0);
        let prev_cpu = prev.map(|p| p.cpu_time_abs_ns).unwrap_or(0);
        let cpu_delta = cpu_time_abs_ns as f64 - prev_cpu as f64;

        let mut cpu_time_percent = 0.0;
        let mut cpu_guest_percent = 0.0;
        if !offline && prev.is_some() && elapsed > 0.0 {
            let base = cpu_delta * 100.0 / (elapsed * 1e9);
            if host_cpus > 0.0 {
                cpu_time_percent = base / host_cpus;
            }
            if vcpu_count > 0 {
                cpu_guest_percent = base / vcpu_count as f64;
            }
        }

        let (curr_mem_percent, max_mem_percent) = if host.memory_kb > 0 {
            let host_mem = host.memory_kb as f64;
            (raw.curr_mem_kb as f64 * 100.0 / host_mem, raw.max_mem_kb as f64 * 100.0 / host_mem)
        } else {
            (0.0, 0.0)
        };

        let rate = |pick: fn(&StatSample) -> u64, new: u64| match prev {
            Some(p) => kib_rate(new, pick(&p), elapsed),
            None => 0.0,
        };
        let disk_read_rate = rate(|s| s.disk_read_bytes, raw.disk_read_bytes);
        let disk_write_rate = rate(|s| s.disk_write_bytes, raw.disk_write_bytes);
        let net_rx_rate = rate(|s| s.net_rx_bytes, raw.net_rx_bytes);
        let net_tx_rate = rate(|s| s.net_tx_bytes, raw.net_tx_bytes);

        // The window counts the new sample, so its start sits n-1 entries back,
        // i.e. index n-2 of the history before insertion.
        let window = MOVING_AVERAGE_WINDOW.min(self.samples.len() + 1);
        let cpu_time_moving_avg_percent = match window.checked_sub(2).and_then(|i| self.samples.get(i)) {
            Some(start) => {
                let span = now - start.timestamp;
                if span > 0.0 && host_cpus > 0.0 {
                    let delta = cpu_time_abs_ns as f64 - start.cpu_time_abs_ns as f64;
                    clamp_percent(delta * 100.0 / (span * 1e9 * host_cpus))
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        let sample = StatSample {
            timestamp: now,
            cpu_time_abs_ns,
            cpu_time_delta_ns: cpu_time_abs_ns.saturating_sub(prev_cpu),
            cpu_time_percent: clamp_percent(cpu_time_percent),
            cpu_guest_percent: clamp_percent(cpu_guest_percent),
            cpu_time_moving_avg_percent,
            curr_mem_kb: raw.curr_mem_kb,
            curr_mem_percent,
            max_mem_kb: raw.max_mem_kb,
            max_mem_percent,
            vcpu_count,
            disk_read_rate,
            disk_write_rate,
            net_rx_rate,
            net_tx_rate,
            disk_read_bytes: raw.disk_read_bytes,
            disk_write_bytes: raw.disk_write_bytes,
            net_rx_bytes: raw.net_rx_bytes,
            net_tx_bytes: raw.net_tx_bytes,
        };

        self.disk_read_max_rate = self.disk_read_max_rate.max(disk_read_rate);
        self.disk_write_max_rate = self.disk_write_max_rate.max(disk_write_rate);
        self.net_rx_max_rate = self.net_rx_max_rate.max(net_rx_rate);
        self.net_tx_max_rate = self.net_tx_max_rate.max(net_tx_rate);

        self.samples.push_front(sample);
        self.samples.truncate(self.capacity);
        sample
    }

    /// Current value of `field`, or 0 with no samples.
    pub fn current(&self, field: StatField) -> f64 {
        self.latest().map(|s| field.value(s)).unwrap_or(0.0)
    }

    /// Copy of one column, newest first, zero-padded to `capacity + 1` entries.
    ///
    /// `limit` caps the length of the returned vector.
    pub fn vector(&self, field: StatField, limit: Option<usize>) -> Vec<f64> {
        let mut len = self.capacity + 1;
        if let Some(limit) = limit {
            len = len.min(limit);
        }
        (0..len).map(|i| self.samples.get(i).map(|s| field.value(s)).unwrap_or(0.0)).collect()
    }

    /// Two columns side by side, e.g. read/write or rx/tx.
    pub fn in_out_vector(
        &self,
        input: StatField,
        output: StatField,
        limit: Option<usize>,
    ) -> (Vec<f64>, Vec<f64>) {
        (self.vector(input, limit), self.vector(output, limit))
    }

    pub fn cpu_time_percent(&self) -> f64 {
        self.current(StatField::CpuTimePercent)
    }

    pub fn cpu_guest_percent(&self) -> f64 {
        self.current(StatField::CpuGuestPercent)
    }

    pub fn current_memory_kb(&self) -> u64 {
        self.latest().map(|s| s.curr_mem_kb).unwrap_or(0)
    }

    pub fn current_memory_percent(&self) -> f64 {
        self.current(StatField::CurrMemPercent)
    }

    pub fn maximum_memory_kb(&self) -> u64 {
        self.latest().map(|s| s.max_mem_kb).unwrap_or(0)
    }

    /// Combined disk read + write rate (KiB/s).
    pub fn disk_io_rate(&self) -> f64 {
        self.current(StatField::DiskReadRate) + self.current(StatField::DiskWriteRate)
    }

    /// Combined network rx + tx rate (KiB/s).
    pub fn network_traffic_rate(&self) -> f64 {
        self.current(StatField::NetRxRate) + self.current(StatField::NetTxRate)
    }

    /// Highest per-direction disk rate seen so far, never below the floor.
    pub fn disk_io_max_rate(&self) -> f64 {
        self.disk_read_max_rate.max(self.disk_write_max_rate)
    }

    pub fn network_traffic_max_rate(&self) -> f64 {
        self.net_rx_max_rate.max(self.net_tx_max_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunState;

    fn host() -> HostInfo {
        HostInfo { memory_kb: 1000, active_cpus: 2, max_cpus: 4 }
    }

    fn running(cpu_time_ns: u64, curr_mem_kb: u64) -> ResourceSnapshot {
        ResourceSnapshot {
            status: RunState::Running,
            cpu_time_ns,
            curr_mem_kb,
            max_mem_kb: 500,
            vcpu_count: 1,
            disk_read_bytes: 0,
            disk_write_bytes: 0,
            net_rx_bytes: 0,
            net_tx_bytes: 0,
        }
    }

    #[test]
    fn test_first_sample_has_zero_cpu() {
        let mut history = StatHistory::new(10);
        let sample = history.record(&running(5_000_000_000, 100), &host(), 100.0);
        assert_eq!(sample.cpu_time_percent, 0.0);
        assert_eq!(sample.cpu_time_moving_avg_percent, 0.0);
        assert_eq!(sample.curr_mem_percent, 10.0);
        assert_eq!(sample.max_mem_percent, 50.0);
    }

    #[test]
    fn test_cpu_percent_against_host_cpus() {
        let mut history = StatHistory::new(10);
        history.record(&running(0, 100), &host(), 100.0);
        // one full cpu-second over one wall second on a 2-cpu host
        let sample = history.record(&running(1_000_000_000, 100), &host(), 101.0);
        assert!((sample.cpu_time_percent - 50.0).abs() < 1e-9);
        assert!((sample.cpu_guest_percent - 100.0).abs() < 1e-9);
        assert_eq!(sample.cpu_time_delta_ns, 1_000_000_000);
    }

    #[test]
    fn test_cpu_percent_clamps_high_and_low() {
        let mut history = StatHistory::new(10);
        history.record(&running(0, 100), &host(), 100.0);
        let high = history.record(&running(10_000_000_000, 100), &host(), 101.0);
        assert_eq!(high.cpu_time_percent, 100.0);

        // counter went backwards (guest restarted between polls)
        let low = history.record(&running(1_000, 100), &host(), 102.0);
        assert_eq!(low.cpu_time_percent, 0.0);
    }

    #[test]
    fn test_identical_timestamps_do_not_divide_by_zero() {
        let mut history = StatHistory::new(10);
        history.record(&running(1_000, 100), &host(), 100.0);
        let sample = history.record(&running(9_000_000, 100), &host(), 100.0);
        assert_eq!(sample.cpu_time_percent, 0.0);
        assert_eq!(sample.cpu_time_moving_avg_percent, 0.0);
        assert!(!sample.cpu_time_percent.is_nan());
    }

    #[test]
    fn test_offline_guest_zeroes_cpu() {
        let mut history = StatHistory::new(10);
        history.record(&running(1_000_000_000, 100), &host(), 100.0);
        let sample = history.record(&ResourceSnapshot::shutoff(500), &host(), 101.0);
        assert_eq!(sample.cpu_time_abs_ns, 0);
        assert_eq!(sample.cpu_time_percent, 0.0);
        assert_eq!(sample.vcpu_count, 0);
    }

    #[test]
    fn test_moving_average_spans_five_samples() {
        let mut history = StatHistory::new(10);
        // 2-cpu host, 0.5 cpu-seconds per wall second => 25%
        for i in 0..4u64 {
            history.record(&running(i * 500_000_000, 100), &host(), 100.0 + i as f64);
        }
        // a burst: 2 cpu-seconds in one second
        let sample = history.record(&running(1_500_000_000 + 2_000_000_000, 100), &host(), 104.0);
        assert_eq!(sample.cpu_time_percent, 100.0);
        // window covers t=100..104: 3.5s cpu over 4s on 2 cpus
        assert!((sample.cpu_time_moving_avg_percent - 43.75).abs() < 1e-9);
    }

    #[test]
    fn test_history_is_bounded_newest_first() {
        let mut history = StatHistory::new(10);
        for i in 0..25u64 {
            history.record(&running(0, i), &host(), i as f64);
        }
        assert_eq!(history.len(), 10);
        let mem: Vec<u64> = history.samples().map(|s| s.curr_mem_kb).collect();
        assert_eq!(mem, (15..25u64).rev().collect::<Vec<_>>());
    }

    #[test]
    fn test_vector_is_padded_copy() {
        let mut history = StatHistory::new(10);
        for i in 1..=3u64 {
            history.record(&running(0, i * 10), &host(), i as f64);
        }
        let full = history.vector(StatField::CurrMemPercent, None);
        assert_eq!(full.len(), 11);
        assert_eq!(&full[..4], &[3.0, 2.0, 1.0, 0.0]);

        let limited = history.vector(StatField::CurrMemPercent, Some(2));
        assert_eq!(limited, vec![3.0, 2.0]);
    }

    #[test]
    fn test_in_out_vector_pairs_columns() {
        let mut history = StatHistory::new(10);
        let mut raw = running(0, 100);
        for (t, read_kib, write_kib) in [(1.0, 0, 0), (2.0, 2, 1), (3.0, 6, 2)] {
            raw.disk_read_bytes = read_kib * 1024;
            raw.disk_write_bytes = write_kib * 1024;
            history.record(&raw, &host(), t);
        }

        let (reads, writes) = history.in_out_vector(StatField::DiskReadRate, StatField::DiskWriteRate, Some(3));
        assert_eq!(reads, vec![4.0, 2.0, 0.0]);
        assert_eq!(writes, vec![1.0, 1.0, 0.0]);

        let (rx, tx) = history.in_out_vector(StatField::NetRxRate, StatField::NetTxRate, None);
        assert_eq!(rx.len(), 11);
        assert_eq!(tx.len(), 11);
        assert!(rx.iter().chain(tx.iter()).all(|v| *v == 0.0));
    }

    #[test]
    fn test_io_rates_and_max() {
        let mut history = StatHistory::new(10);
        let mut raw = running(0, 100);
        history.record(&raw, &host(), 10.0);

        raw.disk_read_bytes = 100 * 1024;
        raw.net_tx_bytes = 40 * 1024;
        let sample = history.record(&raw, &host(), 12.0);
        assert_eq!(sample.disk_read_rate, 50.0);
        assert_eq!(sample.net_tx_rate, 20.0);
        assert_eq!(history.disk_io_max_rate(), 50.0);
        assert_eq!(history.network_traffic_max_rate(), 20.0);
        assert_eq!(history.disk_io_rate(), 50.0);
    }
}
