use std::sync::Arc;
use tracing::{error, info, warn};
use virtmon_core::observability::health::HealthStatus;
use virtmon_core::{
    init_observability, open_uri, shutdown_observability, Config, Connection, ConnectionDriver,
    ConnectionSettings, DriverOptions, EventBus, EventLoop, EventLoopAdapter, HealthChecker,
};

mod shutdown;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    // Initialize observability FIRST
    init_observability(&config.log_level, config.metrics_port)?;

    info!(connections = config.connections.len(), "virtmond starting");

    let health_checker = HealthChecker::new();
    health_checker.register_subsystem(shutdown::DAEMON_SUBSYSTEM.to_string(), HealthStatus::Healthy).await;

    // One loop thread serves every connection's event callbacks
    let event_loop = EventLoop::start()?;
    let loop_handle = event_loop.handle();
    let event_impl = Arc::new(EventLoopAdapter::new(Arc::new(loop_handle.clone())));
    health_checker.register_subsystem(shutdown::EVENT_LOOP_SUBSYSTEM.to_string(), HealthStatus::Healthy).await;

    let bus = EventBus::new();
    let settings = ConnectionSettings::from(&config);

    let mut handles = Vec::new();
    for conn in &config.connections {
        let client = match open_uri(&conn.uri) {
            Ok(client) => client,
            Err(e) => {
                error!(uri = %conn.uri, error = %e, "Skipping connection");
                continue;
            }
        };
        if let Err(e) = client.register_event_impl(event_impl.clone()) {
            warn!(uri = %conn.uri, error = %e, "Event registration failed, polling only");
        }

        let connection = Arc::new(Connection::new(client, settings, bus.clone()));
        let options = DriverOptions {
            poll_interval: config.poll_interval(),
            autoconnect: conn.autoconnect,
            health: Some(health_checker.clone()),
        };
        match ConnectionDriver::spawn(connection, &loop_handle, options) {
            Ok(handle) => {
                info!(uri = %conn.uri, autoconnect = conn.autoconnect, "Connection registered");
                handles.push(handle);
            }
            Err(e) => error!(uri = %conn.uri, error = %e, "Failed to start connection driver"),
        }
    }

    info!("virtmond ready");

    let mut shutdown_rx = shutdown::shutdown_signal();
    let _ = shutdown_rx.recv().await;
    info!("Received shutdown signal");

    shutdown::ShutdownManager::new(handles, event_loop, health_checker).shutdown().await;

    info!("virtmond shutting down");
    shutdown_observability();
    Ok(())
}
