use super::{IoDispatch, Posted, Reactor, SourceId, TimerDispatch};
use crate::error::Result;
use crate::eventimpl::EventMask;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// What a recorded source is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Io { fd: RawFd, mask: EventMask },
    Timeout { interval: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub id: SourceId,
    pub kind: SourceKind,
}

enum Dispatch {
    Io(IoDispatch),
    Timeout(TimerDispatch),
}

/// A reactor that never fires on its own.
///
/// Sources are recorded and fired explicitly with [`fire_io`](Self::fire_io)
/// and [`fire_timer`](Self::fire_timer), on the calling thread, so tests can
/// drive callbacks deterministically.
#[derive(Default)]
pub struct ManualReactor {
    next_id: AtomicU64,
    sources: Mutex<BTreeMap<SourceId, (SourceKind, Dispatch)>>,
    posted: Mutex<VecDeque<Posted>>,
}

impl ManualReactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently registered sources, oldest first.
    pub fn sources(&self) -> Vec<SourceInfo> {
        self.sources.lock().iter().map(|(id, (kind, _))| SourceInfo { id: *id, kind: *kind }).collect()
    }

    pub fn active_sources(&self) -> usize {
        self.sources.lock().len()
    }

    pub fn timeouts(&self) -> Vec<SourceInfo> {
        self.sources()
            .into_iter()
            .filter(|s| matches!(s.kind, SourceKind::Timeout { .. }))
            .collect()
    }

    pub fn io_watches(&self) -> Vec<SourceInfo> {
        self.sources().into_iter().filter(|s| matches!(s.kind, SourceKind::Io { .. })).collect()
    }

    /// Dispatch an io source. Returns false if the source is not registered.
    pub fn fire_io(&self, id: SourceId, fired: EventMask) -> bool {
        let dispatch = match self.sources.lock().get(&id) {
            Some((_, Dispatch::Io(dispatch))) => dispatch.clone(),
            _ => return false,
        };
        dispatch(id, fired);
        true
    }

    /// Dispatch a timeout source. Returns false if the source is not registered.
    pub fn fire_timer(&self, id: SourceId) -> bool {
        let dispatch = match self.sources.lock().get(&id) {
            Some((_, Dispatch::Timeout(dispatch))) => dispatch.clone(),
            _ => return false,
        };
        dispatch(id);
        true
    }

    /// Fire every registered timeout once. Returns how many fired.
    pub fn fire_all_timers(&self) -> usize {
        self.timeouts().into_iter().filter(|s| self.fire_timer(s.id)).count()
    }

    /// Run posted work in order. Returns how many closures ran.
    pub fn run_posted(&self) -> usize {
        let mut ran = 0;
        loop {
            let Some(work) = self.posted.lock().pop_front() else {
                return ran;
            };
            work();
            ran += 1;
        }
    }

    fn insert(&self, kind: SourceKind, dispatch: Dispatch) -> SourceId {
        let id = SourceId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.sources.lock().insert(id, (kind, dispatch));
        id
    }
}

impl Reactor for ManualReactor {
    fn add_io_watch(&self, fd: RawFd, mask: EventMask, dispatch: IoDispatch) -> Result<SourceId> {
        Ok(self.insert(SourceKind::Io { fd, mask }, Dispatch::Io(dispatch)))
    }

    fn add_timeout(&self, interval: Duration, dispatch: TimerDispatch) -> Result<SourceId> {
        Ok(self.insert(SourceKind::Timeout { interval }, Dispatch::Timeout(dispatch)))
    }

    fn remove_source(&self, id: SourceId) -> bool {
        self.sources.lock().remove(&id).is_some()
    }

    fn post(&self, work: Posted) -> Result<()> {
        self.posted.lock().push_back(work);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_records_and_fires() {
        let reactor = ManualReactor::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();

        let id = reactor
            .add_timeout(
                Duration::from_millis(50),
                Arc::new(move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(
            reactor.sources(),
            vec![SourceInfo { id, kind: SourceKind::Timeout { interval: Duration::from_millis(50) } }]
        );

        assert!(reactor.fire_timer(id));
        assert!(!reactor.fire_io(id, EventMask::READABLE));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(reactor.remove_source(id));
        assert!(!reactor.fire_timer(id));
        assert_eq!(reactor.active_sources(), 0);
    }

    #[test]
    fn test_dispatch_may_remove_itself() {
        let reactor = Arc::new(ManualReactor::new());
        let weak = Arc::downgrade(&reactor);
        let id = reactor
            .add_timeout(
                Duration::ZERO,
                Arc::new(move |id| {
                    if let Some(r) = weak.upgrade() {
                        r.remove_source(id);
                    }
                }),
            )
            .unwrap();

        assert!(reactor.fire_timer(id));
        assert!(reactor.sources().is_empty());
    }

    #[test]
    fn test_posted_work_runs_in_order() {
        let reactor = ManualReactor::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            reactor.post(Box::new(move || log.lock().push(i))).unwrap();
        }
        assert_eq!(reactor.run_posted(), 3);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }
}
