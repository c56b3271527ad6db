#![deny(unsafe_op_in_unsafe_fn)]
#![forbid(unreachable_pub)]

//! Pluggable native thread factories for server runtimes.
//!
//! This crate is the thread abstraction layer a worker-pool scheduler or
//! server loop builds on: a [`Runnable`] unit of work, a [`Thread`] handle
//! over one native operating-system thread, and [`ThreadFactory`] backends
//! that construct, start, and join those threads while guaranteeing that a
//! thread and the task it hosts are torn down exactly once.
//!
//! # Backends
//!
//! - [`StdThreadFactory`]: built on `std::thread`, available everywhere.
//! - [`PosixThreadFactory`]: built on pthreads, with scheduler policy,
//!   relative priority, and stack size controls (unix targets, `posix`
//!   feature, on by default).
//!
//! Both satisfy the same lifecycle state machine
//! (`uninitialized -> starting -> started -> stopping -> stopped`) and the
//! same ownership contract: the entry thunk co-owns the thread's shared
//! state, so the caller may drop its handle immediately after `start()` and
//! a detached thread still runs to completion.
//!
//! # Quick start
//!
//! ```no_run
//! use native_threads::{FnRunnable, StdThreadFactory, Thread, ThreadFactory};
//!
//! let factory = StdThreadFactory::new(false); // joinable threads
//! let thread = factory
//!     .new_thread(FnRunnable::new(|| println!("hello from the pool")))
//!     .expect("native thread allocation");
//! thread.start().expect("native thread allocation");
//! thread.join().expect("task completed");
//! ```
//!
//! # What this layer does not do
//!
//! No task queuing, no backpressure, no cancellation: a started task runs to
//! completion unless it checks its own exit conditions. Those concerns
//! belong to the scheduler consuming this crate.

// Core modules
pub mod errors;
pub mod factory;
pub mod runnable;
pub mod thread;

// ============================================================================
// Public API
// ============================================================================

// Factories
pub use factory::{PlatformThreadFactory, ThreadFactory};

#[cfg(all(unix, feature = "posix"))]
pub use factory::posix::{Policy, PosixThread, PosixThreadFactory, Priority};

pub use factory::std_thread::{StdThread, StdThreadFactory};

// Threads
pub use thread::{LifecycleState, Thread, ThreadId};

// Units of work
pub use runnable::{FnRunnable, Runnable, ThreadSlot};

// Errors
pub use errors::{JoinError, SpawnError, ThreadError, ThreadResult};
