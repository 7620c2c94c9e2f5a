//! Integration tests running the adapter and connection drivers on a real
//! event loop thread.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use virtmon_core::eventimpl::TimerCallback;
use virtmon_core::{
    Connection, ConnectionDriver, ConnectionSettings, ConnectionState, DriverOptions, EntityKind,
    EventBus, EventImpl, EventLoop, EventLoopAdapter, HealthChecker, HypervisorClient,
    SimulatedHypervisor,
};

/// Arming a disarmed timer right after creating it installs exactly one
/// periodic source.
#[tokio::test]
async fn test_disarmed_timer_armed_once() {
    let event_loop = EventLoop::start().unwrap();
    let handle = event_loop.handle();
    let adapter = EventLoopAdapter::new(Arc::new(handle.clone()));

    let fired = Arc::new(Mutex::new(Vec::new()));
    let stamps = fired.clone();
    let callback: TimerCallback = Arc::new(move |_| {
        stamps.lock().push(Instant::now());
    });

    let id = adapter.add_timer(-1, callback).unwrap();
    assert_eq!(handle.source_count(), 0);
    adapter.update_timer(id, 50);
    assert_eq!(handle.source_count(), 1);

    // Arming an armed timer does not add a second source
    adapter.update_timer(id, 50);
    assert_eq!(handle.source_count(), 1);

    tokio::time::sleep(Duration::from_millis(320)).await;
    let expiries = fired.lock().clone();
    assert!((3..=6).contains(&expiries.len()), "expected about 6 expiries, got {}", expiries.len());
    // A single 50 ms source: expiries never bunch up
    for pair in expiries.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_millis(40), "expiries {:?} apart", gap);
    }

    adapter.update_timer(id, -1);
    assert_eq!(handle.source_count(), 0);
    let settled = fired.lock().len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(fired.lock().len() <= settled + 1);

    adapter.remove_timer(id).unwrap();
    assert_eq!(adapter.timer_count(), 0);
    event_loop.shutdown();
}

/// Lifecycle events from the hypervisor reach the driver through the loop
/// and trigger a tick well before the next poll.
#[tokio::test]
async fn test_lifecycle_event_triggers_tick() {
    let event_loop = EventLoop::start().unwrap();
    let loop_handle = event_loop.handle();
    let adapter = Arc::new(EventLoopAdapter::new(Arc::new(loop_handle.clone())));

    let sim = SimulatedHypervisor::new("sim:///events");
    sim.register_event_impl(adapter.clone()).unwrap();

    let bus = EventBus::new();
    let mut added = bus.subscribe(vec!["domain.added".to_string()]);
    let connection = Arc::new(Connection::new(Arc::new(sim.clone()), ConnectionSettings::default(), bus));
    let health = HealthChecker::new();
    let options = DriverOptions {
        poll_interval: Duration::from_secs(3600),
        autoconnect: true,
        health: Some(health.clone()),
    };
    let handle = ConnectionDriver::spawn(connection, &loop_handle, options).unwrap();

    // Wait for autoconnect to finish
    handle.tick(true).await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Active);
    assert!(health.is_ready().await);
    // Poll timer, hypervisor watch and keepalive timer
    assert_eq!(loop_handle.source_count(), 3);
    assert_eq!(adapter.watch_count(), 1);
    assert_eq!(adapter.timer_count(), 1);

    sim.define_domain_with_key("vm-a", "alpha", 1024, 1);
    let event = tokio::time::timeout(Duration::from_secs(5), added.recv())
        .await
        .expect("lifecycle event should trigger a tick")
        .unwrap();
    assert_eq!(event.key(), Some("vm-a"));

    // Lifecycle ticks skip sampling
    let entity = handle.view().entity(EntityKind::Domain, "vm-a").unwrap();
    assert!(entity.stats().is_empty());

    handle.shutdown().await;
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert_eq!(adapter.watch_count(), 0);
    assert_eq!(adapter.timer_count(), 0);
    assert_eq!(loop_handle.source_count(), 0);
    assert!(!health.is_ready().await);

    event_loop.shutdown();
}
