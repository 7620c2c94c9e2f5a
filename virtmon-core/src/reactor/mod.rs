//! Single-threaded cooperative event loop.
//!
//! A [`Reactor`] owns *loop sources*: fd watches and repeating timeouts whose
//! dispatch closures always run on the loop thread. [`EventLoop`] is the real
//! implementation, a dedicated thread driving a current-thread tokio runtime.
//! [`ManualReactor`] records sources and fires them on demand for tests.
//!
//! ```text
//! any thread ──add_io_watch/add_timeout/remove_source/post──► command channel
//!                                                                 │
//!                                loop thread ◄────────────────────┘
//!                                  ├── io task per watch   (AsyncFd)
//!                                  ├── timer task per timeout (interval)
//!                                  └── spawned futures (connection drivers)
//! ```

mod event_loop;
mod manual;

pub use event_loop::{EventLoop, LoopHandle};
pub use manual::{ManualReactor, SourceInfo, SourceKind};

use crate::error::Result;
use crate::eventimpl::EventMask;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Identifier of a loop source, unique for the lifetime of its reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u64);

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

/// Invoked on the loop thread with the conditions that fired.
pub type IoDispatch = Arc<dyn Fn(SourceId, EventMask) + Send + Sync>;

/// Invoked on the loop thread on every timeout expiry.
pub type TimerDispatch = Arc<dyn Fn(SourceId) + Send + Sync>;

/// Work posted to run once on the loop thread.
pub type Posted = Box<dyn FnOnce() + Send>;

/// Registration primitives of a cooperative event loop.
///
/// All methods may be called from any thread. Dispatch closures never run
/// concurrently with each other.
pub trait Reactor: Send + Sync {
    /// Watch `fd` for the conditions in `mask`. HANGUP and ERROR are always
    /// reported.
    fn add_io_watch(&self, fd: RawFd, mask: EventMask, dispatch: IoDispatch) -> Result<SourceId>;

    /// Fire `dispatch` every `interval`, first after one full interval.
    fn add_timeout(&self, interval: Duration, dispatch: TimerDispatch) -> Result<SourceId>;

    /// Tear down a source. Returns false if it was unknown. Once this returns
    /// the source will not dispatch again.
    fn remove_source(&self, id: SourceId) -> bool;

    /// Run `work` on the loop thread, in posting order.
    fn post(&self, work: Posted) -> Result<()>;
}
