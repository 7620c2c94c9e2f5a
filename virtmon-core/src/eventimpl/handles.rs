use super::{EventMask, TimerCallback, WatchCallback};
use crate::error::{Result, VirtmonError};
use crate::reactor::SourceId;
use std::collections::BTreeMap;
use std::os::fd::RawFd;

/// Handle id of a registered fd watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatchId(pub u64);

/// Handle id of a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

impl std::fmt::Display for WatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Registered fd watch.
///
/// `mask` empty means the watch is disabled and has no loop source.
#[derive(Clone)]
pub struct WatchHandle {
    pub id: WatchId,
    pub fd: RawFd,
    pub mask: EventMask,
    pub source: Option<SourceId>,
    pub(crate) callback: WatchCallback,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.id)
            .field("fd", &self.fd)
            .field("mask", &self.mask)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Registered timer. `interval_ms < 0` means disarmed.
#[derive(Clone)]
pub struct TimerHandle {
    pub id: TimerId,
    pub interval_ms: i64,
    pub source: Option<SourceId>,
    pub(crate) callback: TimerCallback,
}

impl TimerHandle {
    pub fn is_armed(&self) -> bool {
        self.interval_ms >= 0
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("interval_ms", &self.interval_ms)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Watch registry. Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct WatchTable {
    entries: BTreeMap<WatchId, WatchHandle>,
    next_id: u64,
}

impl WatchTable {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) fn starting_at(next_id: u64) -> Self {
        Self { entries: BTreeMap::new(), next_id }
    }

    pub fn insert(&mut self, fd: RawFd, mask: EventMask, callback: WatchCallback) -> Result<WatchId> {
        let id = WatchId(self.next_id);
        self.next_id = self.next_id.checked_add(1).ok_or_else(|| {
            VirtmonError::RegistrationExhausted { reason: "watch ids exhausted".to_string() }
        })?;
        self.entries.insert(id, WatchHandle { id, fd, mask, source: None, callback });
        Ok(id)
    }

    pub fn get(&self, id: WatchId) -> Option<&WatchHandle> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: WatchId) -> Option<&mut WatchHandle> {
        self.entries.get_mut(&id)
    }

    pub fn remove(&mut self, id: WatchId) -> Option<WatchHandle> {
        self.entries.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for WatchTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer registry. Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct TimerTable {
    entries: BTreeMap<TimerId, TimerHandle>,
    next_id: u64,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) fn starting_at(next_id: u64) -> Self {
        Self { entries: BTreeMap::new(), next_id }
    }

    pub fn insert(&mut self, interval_ms: i64, callback: TimerCallback) -> Result<TimerId> {
        let id = TimerId(self.next_id);
        self.next_id = self.next_id.checked_add(1).ok_or_else(|| {
            VirtmonError::RegistrationExhausted { reason: "timer ids exhausted".to_string() }
        })?;
        let interval_ms = if interval_ms < 0 { -1 } else { interval_ms };
        self.entries.insert(id, TimerHandle { id, interval_ms, source: None, callback });
        Ok(id)
    }

    pub fn get(&self, id: TimerId) -> Option<&TimerHandle> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: TimerId) -> Option<&mut TimerHandle> {
        self.entries.get_mut(&id)
    }

    pub fn remove(&mut self, id: TimerId) -> Option<TimerHandle> {
        self.entries.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TimerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ids_are_monotonic() {
        let mut table = WatchTable::new();
        let a = table.insert(3, EventMask::READABLE, Arc::new(|_, _, _| {})).unwrap();
        let b = table.insert(4, EventMask::READABLE, Arc::new(|_, _, _| {})).unwrap();
        table.remove(a);
        let c = table.insert(3, EventMask::READABLE, Arc::new(|_, _, _| {})).unwrap();
        assert_eq!((a.0, b.0, c.0), (1, 2, 3));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_exhaustion() {
        let mut table = TimerTable::starting_at(u64::MAX);
        let err = table.insert(10, Arc::new(|_| {})).unwrap_err();
        assert!(matches!(err, VirtmonError::RegistrationExhausted { .. }));
        assert!(table.is_empty());
    }

    #[test]
    fn test_negative_interval_is_disarmed() {
        let mut table = TimerTable::new();
        let id = table.insert(-42, Arc::new(|_| {})).unwrap();
        let timer = table.get(id).unwrap();
        assert_eq!(timer.interval_ms, -1);
        assert!(!timer.is_armed());
    }
}
