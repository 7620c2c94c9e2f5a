//! Event-injection bridge between a hypervisor client and the event loop.
//!
//! Hypervisor client libraries do not run their own event loop. Instead they
//! ask the embedding application to watch file descriptors and run interval
//! timers on their behalf, through six registration callbacks. [`EventImpl`]
//! is that callback set; [`EventLoopAdapter`] implements it on top of a
//! [`Reactor`](crate::reactor::Reactor).
//!
//! The registration calls may come from any thread. Dispatch always happens
//! on the loop thread, and a callback whose handle was removed or disabled in
//! the meantime is silently dropped.

mod adapter;
mod handles;
mod mask;

pub use adapter::EventLoopAdapter;
pub use handles::{TimerHandle, TimerId, TimerTable, WatchHandle, WatchId, WatchTable};
pub use mask::EventMask;

use crate::error::Result;
use std::os::fd::RawFd;
use std::sync::Arc;

/// Invoked as `callback(watch, fd, fired)` when a watched fd becomes ready.
///
/// Any client context travels in the closure's captures.
pub type WatchCallback = Arc<dyn Fn(WatchId, RawFd, EventMask) + Send + Sync>;

/// Invoked as `callback(timer)` on every expiry of an armed timer.
pub type TimerCallback = Arc<dyn Fn(TimerId) + Send + Sync>;

/// Registration entry points a hypervisor client installs once at startup.
pub trait EventImpl: Send + Sync {
    /// Watch `fd` for `mask`. An empty mask registers the watch disabled.
    fn add_watch(&self, fd: RawFd, mask: EventMask, callback: WatchCallback) -> Result<WatchId>;

    /// Change the interest mask. Empty disables the watch without removing it;
    /// an unchanged mask does nothing.
    fn update_watch(&self, id: WatchId, mask: EventMask);

    /// Forget a watch. Unknown ids yield `WatchNotFound`, which is not fatal.
    fn remove_watch(&self, id: WatchId) -> Result<()>;

    /// Register a repeating timer. A negative interval registers it disarmed.
    fn add_timer(&self, interval_ms: i64, callback: TimerCallback) -> Result<TimerId>;

    /// Arm (`>= 0`, only if currently disarmed) or disarm (`< 0`) a timer.
    ///
    /// Disarming is safe from inside the timer's own callback.
    fn update_timer(&self, id: TimerId, interval_ms: i64);

    /// Forget a timer. Unknown ids yield `TimerNotFound`, which is not fatal.
    fn remove_timer(&self, id: TimerId) -> Result<()>;
}
