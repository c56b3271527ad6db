//! Units of work hosted by a thread.
//!
//! A [`Runnable`] is handed to a
//! [`ThreadFactory`](crate::factory::ThreadFactory), which binds it to the
//! [`Thread`] that will host it. The binding runs in one direction only: the
//! thread owns its runnable, the runnable holds at most a non-owning back
//! reference to the thread. That back reference is set by the factory, never
//! by the caller, and lets a running task report its own thread's identity
//! or state.

use std::sync::{Arc, Weak};

use crate::thread::Thread;

/// A unit of work with a single execution entry point.
///
/// `run()` executes exactly once, on the native thread that hosts it. The
/// back-reference hooks default to no-ops; implementors that want to observe
/// their hosting thread embed a [`ThreadSlot`] and delegate to it, as
/// [`FnRunnable`] does.
pub trait Runnable: Send + Sync {
    /// Entry point, invoked on the hosting thread.
    fn run(&self);

    /// Associate the hosting thread. Called by the factory when the runnable
    /// is bound to a new thread.
    fn bind_thread(&self, thread: Weak<dyn Thread>) {
        let _ = thread;
    }

    /// The thread currently hosting this runnable, if it is still alive and
    /// the implementor tracks it.
    fn thread(&self) -> Option<Arc<dyn Thread>> {
        None
    }
}

/// Non-owning back-reference slot from a runnable to its hosting thread.
///
/// Holds a `Weak` so the association never keeps the thread alive (the thread
/// owns the runnable; an owning reference back would be a true cycle).
/// Binding replaces any previous association: a runnable is hosted by at most
/// one thread at a time.
pub struct ThreadSlot {
    slot: spin::Mutex<Option<Weak<dyn Thread>>>,
}

impl ThreadSlot {
    pub const fn new() -> Self {
        ThreadSlot {
            slot: spin::Mutex::new(None),
        }
    }

    /// Replace the association.
    pub fn bind(&self, thread: Weak<dyn Thread>) {
        *self.slot.lock() = Some(thread);
    }

    /// Upgrade the association, if the thread is still alive.
    pub fn thread(&self) -> Option<Arc<dyn Thread>> {
        self.slot.lock().as_ref().and_then(Weak::upgrade)
    }
}

impl Default for ThreadSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapter turning a closure into a [`Runnable`] with a tracked back
/// reference.
pub struct FnRunnable<F> {
    func: F,
    slot: ThreadSlot,
}

impl<F> FnRunnable<F>
where
    F: Fn() + Send + Sync + 'static,
{
    pub fn new(func: F) -> Arc<Self> {
        Arc::new(FnRunnable {
            func,
            slot: ThreadSlot::new(),
        })
    }
}

impl<F> Runnable for FnRunnable<F>
where
    F: Fn() + Send + Sync + 'static,
{
    fn run(&self) {
        (self.func)()
    }

    fn bind_thread(&self, thread: Weak<dyn Thread>) {
        self.slot.bind(thread);
    }

    fn thread(&self) -> Option<Arc<dyn Thread>> {
        self.slot.thread()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{JoinError, SpawnError};
    use crate::thread::{LifecycleState, ThreadId};
    use portable_atomic::{AtomicBool, Ordering};

    struct FakeThread {
        runnable: Arc<dyn Runnable>,
    }

    impl Thread for FakeThread {
        fn start(&self) -> Result<(), SpawnError> {
            Ok(())
        }
        fn join(&self) -> Result<(), JoinError> {
            Ok(())
        }
        fn id(&self) -> ThreadId {
            ThreadId::UNSTARTED
        }
        fn runnable(&self) -> Arc<dyn Runnable> {
            self.runnable.clone()
        }
        fn state(&self) -> LifecycleState {
            LifecycleState::Uninitialized
        }
    }

    #[test]
    fn test_fn_runnable_runs_closure() {
        static RAN: AtomicBool = AtomicBool::new(false);
        let runnable = FnRunnable::new(|| RAN.store(true, Ordering::SeqCst));
        runnable.run();
        assert!(RAN.load(Ordering::SeqCst));
    }

    #[test]
    fn test_slot_is_non_owning() {
        let runnable = FnRunnable::new(|| {});
        assert!(runnable.thread().is_none());

        let thread: Arc<dyn Thread> = Arc::new(FakeThread {
            runnable: runnable.clone(),
        });
        runnable.bind_thread(Arc::downgrade(&thread));
        assert!(runnable.thread().is_some());

        // Dropping the owning handle invalidates the back reference.
        drop(thread);
        assert!(runnable.thread().is_none());
    }

    #[test]
    fn test_rebind_replaces_association() {
        let runnable = FnRunnable::new(|| {});
        let first: Arc<dyn Thread> = Arc::new(FakeThread {
            runnable: runnable.clone(),
        });
        let second: Arc<dyn Thread> = Arc::new(FakeThread {
            runnable: runnable.clone(),
        });

        runnable.bind_thread(Arc::downgrade(&first));
        runnable.bind_thread(Arc::downgrade(&second));

        let bound = runnable.thread().unwrap();
        assert!(Arc::ptr_eq(&bound, &second));
    }
}
