//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for histograms measuring duration

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Register all core metrics with descriptions.
///
/// This ensures metrics appear in `/metrics` with proper metadata.
pub fn register_core_metrics() {
    // Tick metrics
    describe_counter!("virtmon_ticks_total", "Total number of completed ticks (by connection)");
    describe_counter!(
        "virtmon_tick_failures_total",
        "Total number of ticks skipped because a fetch failed (by connection)"
    );
    describe_histogram!(
        "virtmon_tick_duration_seconds",
        "Time spent pulling and reconciling one tick (by connection)"
    );

    // Inventory metrics
    describe_gauge!("virtmon_entities", "Tracked entities (by connection, kind)");
    describe_counter!(
        "virtmon_connection_state_changes_total",
        "Connection state transitions (by connection, state)"
    );

    // Event loop adapter metrics
    describe_gauge!("virtmon_event_watches", "Registered fd watches");
    describe_gauge!("virtmon_event_timers", "Registered timers");
}

/// Helper functions for common metric patterns
pub fn record_tick(connection: &str, duration_secs: f64) {
    histogram!("virtmon_tick_duration_seconds", "connection" => connection.to_string())
        .record(duration_secs);
    counter!("virtmon_ticks_total", "connection" => connection.to_string()).increment(1);
}

pub fn record_tick_failure(connection: &str) {
    counter!("virtmon_tick_failures_total", "connection" => connection.to_string()).increment(1);
}

pub fn set_entity_count(connection: &str, kind: &str, count: usize) {
    gauge!("virtmon_entities", "connection" => connection.to_string(), "kind" => kind.to_string())
        .set(count as f64);
}

pub fn record_state_change(connection: &str, state: &str) {
    counter!(
        "virtmon_connection_state_changes_total",
        "connection" => connection.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

pub fn set_event_sources(watches: usize, timers: usize) {
    gauge!("virtmon_event_watches").set(watches as f64);
    gauge!("virtmon_event_timers").set(timers as f64);
}
