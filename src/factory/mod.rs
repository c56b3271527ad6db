//! Thread factories: configurable builders of [`Thread`] handles.
//!
//! A factory encapsulates one backend's creation policy. Two backends exist
//! behind the same trait and are selected at build time:
//!
//! - [`std_thread::StdThreadFactory`] wraps `std::thread` and is available
//!   everywhere.
//! - [`posix::PosixThreadFactory`] wraps pthreads directly and exposes POSIX
//!   scheduling policy, priority, and stack size. Compiled on unix targets
//!   with the `posix` feature (default).
//!
//! [`PlatformThreadFactory`] names the preferred backend for the compilation
//! target, so callers that do not care about scheduling semantics can inject
//! one factory type and stay portable.

use std::sync::Arc;

use crate::errors::SpawnError;
use crate::runnable::Runnable;
use crate::thread::{Thread, ThreadId};

#[cfg(all(unix, feature = "posix"))]
pub mod posix;
pub mod std_thread;

/// Preferred factory backend for the current target.
#[cfg(all(unix, feature = "posix"))]
pub type PlatformThreadFactory = posix::PosixThreadFactory;

/// Preferred factory backend for the current target.
#[cfg(not(all(unix, feature = "posix")))]
pub type PlatformThreadFactory = std_thread::StdThreadFactory;

/// A configurable builder of [`Thread`] handles.
///
/// Configuration (the detached flag and any backend-specific parameters) is
/// snapshotted when `new_thread` runs; a thread never observes later mutation
/// of its factory. Mutators are meant for setup and are not safe to call
/// concurrently with thread creation.
pub trait ThreadFactory: Send + Sync {
    /// Build a thread bound to `runnable` from the factory's current
    /// configuration. Does not start it.
    ///
    /// The factory binds the runnable's back reference to the new handle
    /// before returning, so `runnable.thread()` observes the association
    /// immediately. Fails only if the backend rejects the configuration or
    /// cannot allocate; never because of the runnable itself.
    fn new_thread(&self, runnable: Arc<dyn Runnable>) -> Result<Arc<dyn Thread>, SpawnError>;

    /// The calling thread's identity, usable for logging and ownership
    /// checks. No side effects.
    ///
    /// Identity tokens are backend-specific; compare ids only within one
    /// backend. The std backend reports [`ThreadId::UNSTARTED`] for threads
    /// this library did not create.
    fn current_thread_id(&self) -> ThreadId;

    /// Whether threads built by this factory are detached.
    ///
    /// A detached thread releases its native resources on completion and is
    /// not joinable; `join()` on it returns immediately with no error.
    fn is_detached(&self) -> bool;

    /// Set the detached policy for subsequently created threads.
    fn set_detached(&mut self, detached: bool);
}
