//! Task that owns a [`Connection`] and schedules its ticks.

use super::{Connection, InventoryView, TickReport};
use crate::client::{LifecycleEvent, LifecycleListener};
use crate::error::{Result, VirtmonError};
use crate::events::{ConnectionState, EventSubscriber};
use crate::observability::health::HealthChecker;
use crate::reactor::{LoopHandle, Reactor, SourceId, TimerDispatch};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

/// How a driver runs its connection.
#[derive(Clone)]
pub struct DriverOptions {
    pub poll_interval: Duration,
    /// Connect as soon as the driver starts.
    pub autoconnect: bool,
    /// Receives the connection's state as a subsystem, if set.
    pub health: Option<HealthChecker>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            poll_interval: crate::config::Config::default().poll_interval(),
            autoconnect: true,
            health: None,
        }
    }
}

enum DriverCommand {
    Tick {
        skip_stats: bool,
        reply: Option<oneshot::Sender<TickReport>>,
    },
    Connect(oneshot::Sender<Result<()>>),
    Close(oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<()>),
}

/// Drives one connection: polls it on a reactor timer, ticks it on lifecycle
/// events, and serializes every request coming through its handles.
///
/// Tick requests that pile up while a tick is running are folded into one.
/// The folded tick samples resources unless every request asked to skip.
pub struct ConnectionDriver {
    connection: Arc<Connection>,
    reactor: Arc<dyn Reactor>,
    options: DriverOptions,
    rx: mpsc::UnboundedReceiver<DriverCommand>,
    // Weak so that the driver stops once every handle is gone.
    tx: mpsc::WeakUnboundedSender<DriverCommand>,
    poll_source: Option<SourceId>,
    pending: Option<DriverCommand>,
}

impl ConnectionDriver {
    pub fn new(
        connection: Arc<Connection>,
        reactor: Arc<dyn Reactor>,
        options: DriverOptions,
    ) -> (Self, ConnectionHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Self {
            connection: connection.clone(),
            reactor,
            options,
            rx,
            tx: tx.downgrade(),
            poll_source: None,
            pending: None,
        };
        (driver, ConnectionHandle { tx, connection })
    }

    /// Start a driver on the event loop thread.
    pub fn spawn(
        connection: Arc<Connection>,
        event_loop: &LoopHandle,
        options: DriverOptions,
    ) -> Result<ConnectionHandle> {
        let (driver, handle) = Self::new(connection, Arc::new(event_loop.clone()), options);
        event_loop.spawn(driver.run())?;
        Ok(handle)
    }

    /// Run until shut down or until every handle is dropped.
    #[instrument(skip(self), fields(connection = %self.connection.id()))]
    pub async fn run(mut self) {
        if let Some(health) = &self.options.health {
            health.register_subsystem(self.connection.id().to_string(), self.connection.state().into()).await;
        }

        if self.options.autoconnect {
            if let Err(e) = self.connect().await {
                warn!(error = %e, "Autoconnect failed");
            }
        }

        let mut shutdown_reply = None;
        loop {
            let command = match self.pending.take() {
                Some(command) => command,
                None => match self.rx.recv().await {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                DriverCommand::Tick { skip_stats, reply } => self.tick(skip_stats, reply).await,
                DriverCommand::Connect(reply) => {
                    let result = self.connect().await;
                    let _ = reply.send(result);
                }
                DriverCommand::Close(reply) => {
                    let result = self.close().await;
                    let _ = reply.send(result);
                }
                DriverCommand::Shutdown(reply) => {
                    shutdown_reply = Some(reply);
                    break;
                }
            }
        }

        if let Err(e) = self.close().await {
            debug!(error = %e, "Close during shutdown failed");
        }
        info!("Connection driver stopped");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn connect(&mut self) -> Result<()> {
        let result = self.connection.connect().await;
        self.report_health().await;
        result?;

        if self.poll_source.is_none() {
            let tx = self.tx.clone();
            let dispatch: TimerDispatch = Arc::new(move |_| {
                if let Some(tx) = tx.upgrade() {
                    let _ = tx.send(DriverCommand::Tick { skip_stats: false, reply: None });
                }
            });
            self.poll_source = Some(self.reactor.add_timeout(self.options.poll_interval, dispatch)?);
        }

        let tx = self.tx.clone();
        let listener: LifecycleListener = Arc::new(move |_: LifecycleEvent| {
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(DriverCommand::Tick { skip_stats: true, reply: None });
            }
        });
        match self.connection.client().subscribe_lifecycle(listener) {
            Ok(true) => debug!("Subscribed to lifecycle events"),
            Ok(false) => debug!("Lifecycle events unavailable, polling only"),
            Err(e) => warn!(error = %e, "Lifecycle subscription failed, polling only"),
        }

        // First pull right away rather than one poll interval from now
        self.tick(false, None).await;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.stop_polling();
        let result = self.connection.close().await;
        self.report_health().await;
        result
    }

    async fn tick(&mut self, skip_stats: bool, reply: Option<oneshot::Sender<TickReport>>) {
        let mut skip_stats = skip_stats;
        let mut replies: Vec<_> = reply.into_iter().collect();
        while let Ok(command) = self.rx.try_recv() {
            match command {
                DriverCommand::Tick { skip_stats: skip, reply } => {
                    skip_stats &= skip;
                    replies.extend(reply);
                }
                other => {
                    self.pending = Some(other);
                    break;
                }
            }
        }

        let report = self.connection.tick(skip_stats).await;
        if let TickReport::Failed { disconnected: true, .. } = report {
            self.stop_polling();
            self.report_health().await;
        }
        for reply in replies {
            let _ = reply.send(report.clone());
        }
    }

    fn stop_polling(&mut self) {
        if let Some(source) = self.poll_source.take() {
            self.reactor.remove_source(source);
        }
    }

    async fn report_health(&self) {
        if let Some(health) = &self.options.health {
            health.connection_state_changed(self.connection.id(), self.connection.state()).await;
        }
    }
}

/// Cloneable handle onto a running [`ConnectionDriver`].
#[derive(Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<DriverCommand>,
    connection: Arc<Connection>,
}

impl ConnectionHandle {
    pub fn id(&self) -> &str {
        self.connection.id()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn view(&self) -> InventoryView {
        self.connection.view()
    }

    /// Notifications from this connection's bus.
    pub fn subscribe(&self, filters: Vec<String>) -> EventSubscriber {
        self.connection.bus().subscribe(filters)
    }

    /// Queue a tick without waiting for it.
    pub fn request_tick(&self, skip_stats: bool) -> Result<()> {
        self.send(DriverCommand::Tick { skip_stats, reply: None })
    }

    /// Queue a tick and wait for its report.
    pub async fn tick(&self, skip_stats: bool) -> Result<TickReport> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverCommand::Tick { skip_stats, reply: Some(reply) })?;
        rx.await.map_err(|_| driver_stopped())
    }

    pub async fn connect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverCommand::Connect(reply))?;
        rx.await.map_err(|_| driver_stopped())?
    }

    pub async fn close(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverCommand::Close(reply))?;
        rx.await.map_err(|_| driver_stopped())?
    }

    /// Close the connection and stop the driver. Waits for both.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(DriverCommand::Shutdown(reply)).is_ok() {
            let _ = rx.await;
        }
    }

    fn send(&self, command: DriverCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| driver_stopped())
    }
}

fn driver_stopped() -> VirtmonError {
    VirtmonError::Internal("connection driver has stopped".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SimulatedHypervisor;
    use crate::connection::ConnectionSettings;
    use crate::events::EventBus;
    use crate::reactor::ManualReactor;

    fn driver(
        sim: &SimulatedHypervisor,
        autoconnect: bool,
    ) -> (Arc<ManualReactor>, ConnectionDriver, ConnectionHandle) {
        let reactor = Arc::new(ManualReactor::new());
        let connection = Arc::new(Connection::new(
            Arc::new(sim.clone()),
            ConnectionSettings::default(),
            EventBus::new(),
        ));
        let options = DriverOptions {
            poll_interval: Duration::from_millis(500),
            autoconnect,
            health: Some(HealthChecker::new()),
        };
        let (driver, handle) = ConnectionDriver::new(connection, reactor.clone(), options);
        (reactor, driver, handle)
    }

    #[tokio::test]
    async fn test_autoconnect_installs_poll_timer() {
        let sim = SimulatedHypervisor::new("sim:///driver");
        sim.define_domain_with_key("vm-a", "alpha", 1024, 1);
        let (reactor, driver, handle) = driver(&sim, true);
        tokio::spawn(driver.run());

        // Round-trip through the driver so autoconnect has finished
        handle.tick(true).await.unwrap();
        assert_eq!(handle.state(), ConnectionState::Active);
        assert_eq!(handle.view().len(), 1);

        let timers = reactor.timeouts();
        assert_eq!(timers.len(), 1);
        assert!(matches!(
            timers[0].kind,
            crate::reactor::SourceKind::Timeout { interval } if interval == Duration::from_millis(500)
        ));

        handle.shutdown().await;
        assert_eq!(reactor.active_sources(), 0);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_poll_timer_requests_ticks() {
        let sim = SimulatedHypervisor::new("sim:///driver");
        let (reactor, driver, handle) = driver(&sim, true);
        let mut sub = handle.subscribe(vec!["domain.*".to_string()]);
        tokio::spawn(driver.run());
        handle.tick(true).await.unwrap();

        sim.define_domain_with_key("vm-b", "beta", 1024, 1);
        assert_eq!(reactor.fire_all_timers(), 1);

        let event = tokio::time::timeout(Duration::from_secs(5), sub.recv()).await.unwrap().unwrap();
        assert_eq!(event.event_type(), "domain.added");
        assert_eq!(event.key(), Some("vm-b"));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_connect_and_close() {
        let sim = SimulatedHypervisor::new("sim:///driver");
        let (reactor, driver, handle) = driver(&sim, false);
        tokio::spawn(driver.run());

        assert_eq!(handle.tick(false).await.unwrap(), TickReport::Skipped);
        assert_eq!(reactor.active_sources(), 0);

        handle.connect().await.unwrap();
        assert_eq!(handle.state(), ConnectionState::Active);
        assert_eq!(reactor.timeouts().len(), 1);

        handle.close().await.unwrap();
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(reactor.timeouts().is_empty());

        handle.shutdown().await;
        assert!(handle.request_tick(false).is_err());
    }

    #[tokio::test]
    async fn test_failed_connect_is_reported() {
        let sim = SimulatedHypervisor::new("sim:///driver");
        sim.set_reachable(false);
        let (reactor, driver, handle) = driver(&sim, false);
        tokio::spawn(driver.run());

        assert!(handle.connect().await.is_err());
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert_eq!(reactor.active_sources(), 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_driver() {
        let sim = SimulatedHypervisor::new("sim:///driver");
        let (_reactor, driver, handle) = driver(&sim, true);
        let task = tokio::spawn(driver.run());
        handle.tick(true).await.unwrap();

        drop(handle);
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(!sim.is_open());
    }
}
