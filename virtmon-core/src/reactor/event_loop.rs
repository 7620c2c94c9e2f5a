use super::{IoDispatch, Posted, Reactor, SourceId, TimerDispatch};
use crate::error::{Result, VirtmonError};
use crate::eventimpl::EventMask;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::runtime::{Builder, Handle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle as TaskHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

enum LoopCommand {
    AddIo { id: SourceId, fd: AsyncFd<OwnedFd>, interest: Interest, mask: EventMask, dispatch: IoDispatch },
    AddTimeout { id: SourceId, interval: Duration, dispatch: TimerDispatch },
    Remove(SourceId),
    Post(Posted),
    Shutdown,
}

/// The running loop thread. Dropping it stops the loop.
pub struct EventLoop {
    handle: LoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Spawn the loop thread and wait until its runtime is up.
    pub fn start() -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let live = Arc::new(Mutex::new(HashSet::new()));
        let loop_live = live.clone();

        let thread = std::thread::Builder::new()
            .name("virtmon-loop".to_string())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));
                runtime.block_on(drive(rx, loop_live));
                debug!("Event loop thread exiting");
            })
            .map_err(VirtmonError::internal)?;

        let runtime = ready_rx
            .recv()
            .map_err(|_| VirtmonError::EventLoopStopped)?
            .map_err(VirtmonError::internal)?;

        info!("Event loop started");
        Ok(Self {
            handle: LoopHandle {
                inner: Arc::new(Shared {
                    tx,
                    runtime,
                    next_id: AtomicU64::new(1),
                    live,
                }),
            },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Stop the loop and join its thread. Tasks still running are dropped.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.inner.tx.send(LoopCommand::Shutdown);
            if thread.join().is_err() {
                warn!("Event loop thread panicked");
            }
            info!("Event loop stopped");
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Shared {
    tx: mpsc::UnboundedSender<LoopCommand>,
    runtime: Handle,
    next_id: AtomicU64,
    live: Arc<Mutex<HashSet<SourceId>>>,
}

/// Cloneable, thread-safe handle onto a running [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    inner: Arc<Shared>,
}

impl LoopHandle {
    /// Run a future on the loop thread.
    pub fn spawn<F>(&self, future: F) -> Result<TaskHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.tx.is_closed() {
            return Err(VirtmonError::EventLoopStopped);
        }
        Ok(self.inner.runtime.spawn(future))
    }

    /// Number of sources currently registered.
    pub fn source_count(&self) -> usize {
        self.inner.live.lock().len()
    }

    fn allocate(&self) -> Result<SourceId> {
        if self.inner.tx.is_closed() {
            return Err(VirtmonError::EventLoopStopped);
        }
        let raw = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if raw == u64::MAX {
            return Err(VirtmonError::RegistrationExhausted {
                reason: "loop source ids exhausted".to_string(),
            });
        }
        Ok(SourceId(raw))
    }

    fn submit(&self, id: SourceId, command: LoopCommand) -> Result<SourceId> {
        self.inner.live.lock().insert(id);
        if self.inner.tx.send(command).is_err() {
            self.inner.live.lock().remove(&id);
            return Err(VirtmonError::EventLoopStopped);
        }
        Ok(id)
    }
}

impl Reactor for LoopHandle {
    fn add_io_watch(&self, fd: RawFd, mask: EventMask, dispatch: IoDispatch) -> Result<SourceId> {
        let id = self.allocate()?;
        let interest = interest_for(mask);

        // SAFETY: the caller keeps `fd` open for the duration of this call;
        // the watch itself runs on an owned duplicate.
        let dup = unsafe { BorrowedFd::borrow_raw(fd) }.try_clone_to_owned().map_err(|e| {
            VirtmonError::RegistrationExhausted { reason: format!("cannot duplicate fd {}: {}", fd, e) }
        })?;
        let afd = {
            let _guard = self.inner.runtime.enter();
            AsyncFd::with_interest(dup, interest).map_err(|e| VirtmonError::RegistrationExhausted {
                reason: format!("cannot register fd {}: {}", fd, e),
            })?
        };

        debug!(source = %id, fd, %mask, "Adding io watch");
        self.submit(id, LoopCommand::AddIo { id, fd: afd, interest, mask, dispatch })
    }

    fn add_timeout(&self, interval: Duration, dispatch: TimerDispatch) -> Result<SourceId> {
        let id = self.allocate()?;
        debug!(source = %id, interval_ms = interval.as_millis() as u64, "Adding timeout");
        self.submit(id, LoopCommand::AddTimeout { id, interval, dispatch })
    }

    fn remove_source(&self, id: SourceId) -> bool {
        if !self.inner.live.lock().remove(&id) {
            return false;
        }
        debug!(source = %id, "Removing source");
        // A stopped loop has already dropped every task.
        let _ = self.inner.tx.send(LoopCommand::Remove(id));
        true
    }

    fn post(&self, work: Posted) -> Result<()> {
        self.inner.tx.send(LoopCommand::Post(work)).map_err(|_| VirtmonError::EventLoopStopped)
    }
}

fn interest_for(mask: EventMask) -> Interest {
    match (mask.contains(EventMask::READABLE), mask.contains(EventMask::WRITABLE)) {
        (true, true) => Interest::READABLE | Interest::WRITABLE,
        (false, true) => Interest::WRITABLE,
        // hangup and error are reported through read readiness
        _ => Interest::READABLE,
    }
}

async fn drive(mut rx: mpsc::UnboundedReceiver<LoopCommand>, live: Arc<Mutex<HashSet<SourceId>>>) {
    let mut tasks: HashMap<SourceId, TaskHandle<()>> = HashMap::new();

    while let Some(command) = rx.recv().await {
        // Finished tasks (fd errors) leave stale handles behind.
        tasks.retain(|_, task| !task.is_finished());

        match command {
            LoopCommand::AddIo { id, fd, interest, mask, dispatch } => {
                let live = live.clone();
                tasks.insert(id, tokio::spawn(watch_fd(id, fd, interest, mask, dispatch, live)));
            }
            LoopCommand::AddTimeout { id, interval, dispatch } => {
                let live = live.clone();
                tasks.insert(id, tokio::spawn(run_timeout(id, interval, dispatch, live)));
            }
            LoopCommand::Remove(id) => {
                if let Some(task) = tasks.remove(&id) {
                    task.abort();
                    let _ = task.await;
                }
            }
            LoopCommand::Post(work) => work(),
            LoopCommand::Shutdown => break,
        }
    }

    for (_, task) in tasks.drain() {
        task.abort();
    }
}

async fn watch_fd(
    id: SourceId,
    fd: AsyncFd<OwnedFd>,
    interest: Interest,
    mask: EventMask,
    dispatch: IoDispatch,
    live: Arc<Mutex<HashSet<SourceId>>>,
) {
    let wanted = mask | EventMask::HANGUP | EventMask::ERROR;
    let raw = fd.get_ref().as_raw_fd();
    loop {
        let mut guard = match fd.ready(interest).await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(source = %id, error = %e, "Io watch failed");
                return;
            }
        };

        // Level-triggered: dispatch again for as long as the condition holds,
        // so a callback that consumes part of the pending input is re-run.
        loop {
            let fired = match poll_now(raw, mask) {
                Ok(fired) => fired & wanted,
                Err(e) => {
                    warn!(source = %id, error = %e, "Io watch failed");
                    return;
                }
            };
            if fired.is_empty() {
                guard.clear_ready();
                break;
            }
            if !live.lock().contains(&id) {
                return;
            }
            dispatch(id, fired);
            tokio::task::yield_now().await;
        }
    }
}

/// Conditions pending on `fd` right now, from a zero-timeout `poll(2)`.
fn poll_now(fd: RawFd, mask: EventMask) -> std::io::Result<EventMask> {
    let mut events: libc::c_short = 0;
    if mask.contains(EventMask::READABLE) {
        events |= libc::POLLIN;
    }
    if mask.contains(EventMask::WRITABLE) {
        events |= libc::POLLOUT;
    }
    let mut pollfd = libc::pollfd { fd, events, revents: 0 };
    loop {
        // SAFETY: one initialized pollfd, and a zero timeout never blocks.
        let n = unsafe { libc::poll(&mut pollfd, 1, 0) };
        if n >= 0 {
            break;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }

    let revents = pollfd.revents;
    let mut fired = EventMask::empty();
    if revents & libc::POLLIN != 0 {
        fired |= EventMask::READABLE;
    }
    if revents & libc::POLLOUT != 0 {
        fired |= EventMask::WRITABLE;
    }
    if revents & libc::POLLHUP != 0 {
        fired |= EventMask::HANGUP;
    }
    if revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
        fired |= EventMask::ERROR;
    }
    Ok(fired)
}

async fn run_timeout(
    id: SourceId,
    interval: Duration,
    dispatch: TimerDispatch,
    live: Arc<Mutex<HashSet<SourceId>>>,
) {
    if interval.is_zero() {
        loop {
            tokio::task::yield_now().await;
            if !live.lock().contains(&id) {
                return;
            }
            dispatch(id);
        }
    }

    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !live.lock().contains(&id) {
            return;
        }
        dispatch(id);
    }
}
