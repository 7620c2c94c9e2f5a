//! Per-entity and per-host resource statistics.
//!
//! Every tick turns a raw [`ResourceSnapshot`](crate::types::ResourceSnapshot)
//! into a derived [`StatSample`] and pushes it onto the front of the entity's
//! bounded [`StatHistory`]. Percentages are computed against the host
//! capacity pulled on the same tick.
//!
//! ```text
//! ResourceSnapshot ──record()──► StatSample ──► StatHistory (newest first, ≤ history_length)
//!                                     │
//!                                     └──► HostStatHistory (aggregate over active domains)
//! ```

mod history;
mod host;
mod sample;

pub use history::{StatHistory, MOVING_AVERAGE_WINDOW};
pub use host::{HostField, HostSample, HostStatHistory};
pub use sample::{StatField, StatSample};

/// Floor used for the running maximum I/O rates (KiB/s).
pub const MIN_MAX_RATE: f64 = 10.0;

pub(crate) fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// Rate in KiB/s between two cumulative byte counters, never negative.
pub(crate) fn kib_rate(new_bytes: u64, old_bytes: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    let diff = (new_bytes / 1024) as f64 - (old_bytes / 1024) as f64;
    (diff / elapsed_secs).max(0.0)
}

/// Seconds since the Unix epoch as a float, the resolution samples are keyed on.
pub fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(150.0), 100.0);
        assert_eq!(clamp_percent(-3.0), 0.0);
        assert_eq!(clamp_percent(f64::NAN), 0.0);
        assert_eq!(clamp_percent(42.5), 42.5);
    }

    #[test]
    fn test_kib_rate() {
        assert_eq!(kib_rate(4096, 2048, 2.0), 1.0);
        assert_eq!(kib_rate(0, 4096, 1.0), 0.0);
        assert_eq!(kib_rate(4096, 0, 0.0), 0.0);
    }
}
