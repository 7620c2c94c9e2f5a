use super::{
    EventImpl, EventMask, TimerCallback, TimerId, TimerTable, WatchCallback, WatchId, WatchTable,
};
use crate::error::{Result, VirtmonError};
use crate::observability::metrics;
use crate::reactor::{IoDispatch, Reactor, SourceId, TimerDispatch};
use parking_lot::Mutex;
use std::os::fd::RawFd;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct HandleTables {
    watches: WatchTable,
    timers: TimerTable,
}

impl HandleTables {
    fn publish_counts(&self) {
        metrics::set_event_sources(self.watches.len(), self.timers.len());
    }
}

/// [`EventImpl`] backed by a [`Reactor`].
///
/// One mutex guards both handle tables and their id counters. It is never
/// held while calling into the reactor or while running a client callback,
/// so callbacks may freely re-enter the adapter.
pub struct EventLoopAdapter {
    reactor: Arc<dyn Reactor>,
    tables: Arc<Mutex<HandleTables>>,
}

impl EventLoopAdapter {
    pub fn new(reactor: Arc<dyn Reactor>) -> Self {
        Self { reactor, tables: Arc::new(Mutex::new(HandleTables::default())) }
    }

    /// Snapshot of a registered watch.
    pub fn watch(&self, id: WatchId) -> Option<super::WatchHandle> {
        self.tables.lock().watches.get(id).cloned()
    }

    /// Snapshot of a registered timer.
    pub fn timer(&self, id: TimerId) -> Option<super::TimerHandle> {
        self.tables.lock().timers.get(id).cloned()
    }

    pub fn watch_count(&self) -> usize {
        self.tables.lock().watches.len()
    }

    pub fn timer_count(&self) -> usize {
        self.tables.lock().timers.len()
    }

    fn install_watch(&self, id: WatchId, fd: RawFd, mask: EventMask) -> Result<()> {
        let source = self.reactor.add_io_watch(fd, mask, self.watch_dispatch(id))?;

        let mut tables = self.tables.lock();
        match tables.watches.get_mut(id) {
            Some(watch) if watch.mask == mask && watch.source.is_none() => {
                watch.source = Some(source);
            }
            _ => {
                // Updated or removed while we were registering.
                drop(tables);
                self.reactor.remove_source(source);
            }
        }
        Ok(())
    }

    fn install_timer(&self, id: TimerId, interval_ms: i64) -> Result<()> {
        let interval = Duration::from_millis(interval_ms.max(0) as u64);
        let source = self.reactor.add_timeout(interval, self.timer_dispatch(id))?;

        let mut tables = self.tables.lock();
        match tables.timers.get_mut(id) {
            Some(timer) if timer.interval_ms == interval_ms && timer.source.is_none() => {
                timer.source = Some(source);
            }
            _ => {
                drop(tables);
                self.reactor.remove_source(source);
            }
        }
        Ok(())
    }

    fn watch_dispatch(&self, id: WatchId) -> IoDispatch {
        let tables: Weak<Mutex<HandleTables>> = Arc::downgrade(&self.tables);
        Arc::new(move |source: SourceId, fired: EventMask| {
            let Some(tables) = tables.upgrade() else {
                return;
            };
            let target = {
                let tables = tables.lock();
                match tables.watches.get(id) {
                    // `source` unset while enabled: install still in flight
                    Some(watch)
                        if watch.source == Some(source)
                            || (watch.source.is_none() && !watch.mask.is_empty()) =>
                    {
                        Some((watch.fd, watch.callback.clone()))
                    }
                    _ => None,
                }
            };
            match target {
                Some((fd, callback)) => callback(id, fd, fired),
                None => debug!(watch = %id, %source, "Dropping dispatch for stale watch source"),
            }
        })
    }

    fn timer_dispatch(&self, id: TimerId) -> TimerDispatch {
        let tables: Weak<Mutex<HandleTables>> = Arc::downgrade(&self.tables);
        Arc::new(move |source: SourceId| {
            let Some(tables) = tables.upgrade() else {
                return;
            };
            let callback = {
                let tables = tables.lock();
                match tables.timers.get(id) {
                    Some(timer)
                        if timer.source == Some(source)
                            || (timer.source.is_none() && timer.is_armed()) =>
                    {
                        Some(timer.callback.clone())
                    }
                    _ => None,
                }
            };
            match callback {
                Some(callback) => callback(id),
                None => debug!(timer = %id, %source, "Dropping dispatch for stale timer source"),
            }
        })
    }
}

impl EventImpl for EventLoopAdapter {
    fn add_watch(&self, fd: RawFd, mask: EventMask, callback: WatchCallback) -> Result<WatchId> {
        let id = {
            let mut tables = self.tables.lock();
            let id = tables.watches.insert(fd, mask, callback)?;
            tables.publish_counts();
            id
        };
        debug!(watch = %id, fd, %mask, "Adding watch");

        if !mask.is_empty() {
            if let Err(e) = self.install_watch(id, fd, mask) {
                let mut tables = self.tables.lock();
                tables.watches.remove(id);
                tables.publish_counts();
                return Err(e);
            }
        }
        Ok(id)
    }

    fn update_watch(&self, id: WatchId, mask: EventMask) {
        let (fd, old_source) = {
            let mut tables = self.tables.lock();
            let Some(watch) = tables.watches.get_mut(id) else {
                debug!(watch = %id, "Update for unknown watch");
                return;
            };
            if watch.mask == mask {
                return;
            }
            watch.mask = mask;
            (watch.fd, watch.source.take())
        };
        debug!(watch = %id, %mask, "Updating watch");

        if let Some(source) = old_source {
            self.reactor.remove_source(source);
        }
        if !mask.is_empty() {
            if let Err(e) = self.install_watch(id, fd, mask) {
                warn!(watch = %id, fd, error = %e, "Failed to re-arm watch");
            }
        }
    }

    fn remove_watch(&self, id: WatchId) -> Result<()> {
        let removed = {
            let mut tables = self.tables.lock();
            let removed = tables.watches.remove(id);
            tables.publish_counts();
            removed
        };
        let Some(watch) = removed else {
            debug!(watch = %id, "Remove for unknown watch");
            return Err(VirtmonError::WatchNotFound { id: id.0 });
        };
        debug!(watch = %id, fd = watch.fd, "Removing watch");

        if let Some(source) = watch.source {
            self.reactor.remove_source(source);
        }
        Ok(())
    }

    fn add_timer(&self, interval_ms: i64, callback: TimerCallback) -> Result<TimerId> {
        let id = {
            let mut tables = self.tables.lock();
            let id = tables.timers.insert(interval_ms, callback)?;
            tables.publish_counts();
            id
        };
        debug!(timer = %id, interval_ms, "Adding timer");

        if interval_ms >= 0 {
            if let Err(e) = self.install_timer(id, interval_ms) {
                let mut tables = self.tables.lock();
                tables.timers.remove(id);
                tables.publish_counts();
                return Err(e);
            }
        }
        Ok(id)
    }

    fn update_timer(&self, id: TimerId, interval_ms: i64) {
        if interval_ms >= 0 {
            {
                let mut tables = self.tables.lock();
                let Some(timer) = tables.timers.get_mut(id) else {
                    debug!(timer = %id, "Update for unknown timer");
                    return;
                };
                if timer.is_armed() {
                    return;
                }
                timer.interval_ms = interval_ms;
            }
            debug!(timer = %id, interval_ms, "Arming timer");
            if let Err(e) = self.install_timer(id, interval_ms) {
                warn!(timer = %id, error = %e, "Failed to arm timer");
                if let Some(timer) = self.tables.lock().timers.get_mut(id) {
                    timer.interval_ms = -1;
                }
            }
        } else {
            let source = {
                let mut tables = self.tables.lock();
                let Some(timer) = tables.timers.get_mut(id) else {
                    debug!(timer = %id, "Update for unknown timer");
                    return;
                };
                if !timer.is_armed() {
                    return;
                }
                timer.interval_ms = -1;
                timer.source.take()
            };
            debug!(timer = %id, "Disarming timer");
            if let Some(source) = source {
                self.reactor.remove_source(source);
            }
        }
    }

    fn remove_timer(&self, id: TimerId) -> Result<()> {
        let removed = {
            let mut tables = self.tables.lock();
            let removed = tables.timers.remove(id);
            tables.publish_counts();
            removed
        };
        let Some(timer) = removed else {
            debug!(timer = %id, "Remove for unknown timer");
            return Err(VirtmonError::TimerNotFound { id: id.0 });
        };
        debug!(timer = %id, "Removing timer");

        if let Some(source) = timer.source {
            self.reactor.remove_source(source);
        }
        Ok(())
    }
}
