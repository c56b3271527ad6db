//! The `Thread` contract shared by every factory backend.
//!
//! A [`Thread`] is a handle to one native operating-system thread: identity,
//! `start`/`join`, and the [`Runnable`] it hosts. Backends differ in how the
//! native thread is created (pthreads vs `std::thread`) but satisfy the same
//! lifecycle state machine defined here.

use std::sync::Arc;

use portable_atomic::{AtomicU8, Ordering};

use crate::errors::{JoinError, SpawnError};
use crate::runnable::Runnable;

/// Unique identifier for a native thread.
///
/// The value is an opaque per-backend token: the pthread handle for the POSIX
/// backend, a library-assigned counter for the std backend. The only
/// guarantees are that it is stable for the lifetime of the thread and that
/// [`ThreadId::UNSTARTED`] is never a live thread's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Null identity sentinel, reported before a native thread exists.
    pub const UNSTARTED: ThreadId = ThreadId(0);

    pub(crate) fn new(id: u64) -> Self {
        ThreadId(id)
    }

    /// Get the raw token value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether this is the null identity sentinel.
    pub fn is_unstarted(self) -> bool {
        self.0 == 0
    }
}

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread execution state.
///
/// Transitions are monotonic in declaration order. `start()` is only
/// effective from `Uninitialized`; the entry thunk runs the hosted task only
/// when the state is exactly `Starting` and moves `Started` to `Stopping`
/// once the task returns. A successful `join()` stores `Stopped`; a detached
/// thread finishes at `Stopping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LifecycleState {
    /// Created, `start()` not yet called
    Uninitialized = 0,
    /// `start()` ran, the native thread may not have been scheduled yet
    Starting = 1,
    /// The hosted task is executing on the native thread
    Started = 2,
    /// The hosted task returned
    Stopping = 3,
    /// The native thread was joined
    Stopped = 4,
}

impl LifecycleState {
    fn from_u8(value: u8) -> LifecycleState {
        match value {
            0 => LifecycleState::Uninitialized,
            1 => LifecycleState::Starting,
            2 => LifecycleState::Started,
            3 => LifecycleState::Stopping,
            _ => LifecycleState::Stopped,
        }
    }
}

/// Atomic cell holding a [`LifecycleState`].
///
/// Loads are acquire and stores are release, so a state observed by the entry
/// thunk orders after everything the starting thread did before publishing
/// it. Observing the state without `join()` gives no ordering guarantee about
/// the hosted task itself.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        StateCell(AtomicU8::new(LifecycleState::Uninitialized as u8))
    }

    pub(crate) fn load(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: LifecycleState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Compare-and-swap `from` to `to`. Returns whether the transition won.
    pub(crate) fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Handle to one native operating-system thread.
///
/// Handles are created by a [`ThreadFactory`](crate::factory::ThreadFactory)
/// and own the native resource: dropping a non-detached handle performs a
/// best-effort join so a live native thread is never abandoned. The hosted
/// task may hold a non-owning back reference to its handle (set by the
/// factory) to report its own identity or state.
pub trait Thread: Send + Sync {
    /// Start the native thread.
    ///
    /// The hosted runnable's `run()` executes on the newly created thread,
    /// never on the caller's. Calling `start()` a second time, in any state
    /// past `Uninitialized`, is a silent no-op.
    ///
    /// Fails only if the backend cannot allocate the native resource.
    fn start(&self) -> Result<(), SpawnError>;

    /// Block until the hosted task has returned.
    ///
    /// A no-op for detached threads and threads that were never started.
    /// Returns only after `run()` has returned; everything the task wrote is
    /// visible to the caller afterwards.
    fn join(&self) -> Result<(), JoinError>;

    /// The thread's identity, or [`ThreadId::UNSTARTED`] if the native
    /// thread does not exist yet.
    fn id(&self) -> ThreadId;

    /// The hosted runnable.
    fn runnable(&self) -> Arc<dyn Runnable>;

    /// Current lifecycle state.
    ///
    /// Polling this from another thread is inherently racy; the only
    /// reliable completion signal is `join()` returning.
    fn state(&self) -> LifecycleState;
}

impl core::fmt::Debug for dyn Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_order_is_monotonic() {
        assert!(LifecycleState::Uninitialized < LifecycleState::Starting);
        assert!(LifecycleState::Starting < LifecycleState::Started);
        assert!(LifecycleState::Started < LifecycleState::Stopping);
        assert!(LifecycleState::Stopping < LifecycleState::Stopped);
    }

    #[test]
    fn test_state_cell_transitions() {
        let cell = StateCell::new();
        assert_eq!(cell.load(), LifecycleState::Uninitialized);

        assert!(cell.transition(LifecycleState::Uninitialized, LifecycleState::Starting));
        assert_eq!(cell.load(), LifecycleState::Starting);

        // A lost race does not clobber the state.
        assert!(!cell.transition(LifecycleState::Uninitialized, LifecycleState::Starting));
        assert_eq!(cell.load(), LifecycleState::Starting);

        cell.store(LifecycleState::Stopping);
        assert!(!cell.transition(LifecycleState::Started, LifecycleState::Stopping));
        assert_eq!(cell.load(), LifecycleState::Stopping);
    }

    #[test]
    fn test_thread_id_sentinel() {
        assert!(ThreadId::UNSTARTED.is_unstarted());
        assert_eq!(ThreadId::UNSTARTED.as_u64(), 0);
        assert!(!ThreadId::new(7).is_unstarted());
        assert_eq!(ThreadId::new(7).to_string(), "7");
    }
}
