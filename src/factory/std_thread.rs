//! Factory backend built on `std::thread`.
//!
//! The structural problem this backend solves: the native thread's entry
//! point needs the thread object alive for the whole run, but the caller may
//! drop its handle right after `start()` (fire-and-forget detached threads).
//! The object is therefore split into a public handle ([`StdThread`]) and a
//! shared inner; the entry thunk owns a second, independent `Arc` of the
//! inner, so the inner lives for max(caller lifetime, native-thread lifetime)
//! without a reference cycle. Only the handle joins on drop, which also means
//! teardown can never run on the thread it would join.

use std::cell::Cell;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;

use portable_atomic::{AtomicBool, AtomicU64, Ordering};

use crate::errors::{JoinError, SpawnError};
use crate::factory::ThreadFactory;
use crate::runnable::Runnable;
use crate::thread::{LifecycleState, StateCell, Thread, ThreadId};

/// Global thread ID counter. `std::thread::ThreadId` has no stable integer
/// form, so this backend assigns its own tokens.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Library-assigned ID of the current thread, 0 when the current thread
    /// was not created by this backend.
    static CURRENT_THREAD_ID: Cell<u64> = const { Cell::new(0) };
}

fn next_thread_id() -> Result<u64, SpawnError> {
    NEXT_ID
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
        .map_err(|_| SpawnError::ResourceExhausted(io::Error::other("thread id space exhausted")))
}

/// A thread factory wrapping `std::thread`.
///
/// Carries only the detached policy; stack size and scheduling parameters are
/// the POSIX backend's concern. By default threads are detached and therefore
/// not joinable.
#[derive(Debug, Clone)]
pub struct StdThreadFactory {
    detached: bool,
}

impl StdThreadFactory {
    pub fn new(detached: bool) -> Self {
        StdThreadFactory { detached }
    }
}

impl Default for StdThreadFactory {
    fn default() -> Self {
        StdThreadFactory::new(true)
    }
}

impl ThreadFactory for StdThreadFactory {
    fn new_thread(&self, runnable: Arc<dyn Runnable>) -> Result<Arc<dyn Thread>, SpawnError> {
        let thread = Arc::new(StdThread {
            inner: Arc::new(StdThreadInner {
                id: AtomicU64::new(0),
                state: StateCell::new(),
                panicked: AtomicBool::new(false),
                detached: self.detached,
                runnable,
                native: spin::Mutex::new(None),
            }),
        });

        let thread_dyn: Arc<dyn Thread> = thread.clone();
        let weak: Weak<dyn Thread> = Arc::downgrade(&thread_dyn);
        thread.inner.runnable.bind_thread(weak);

        Ok(thread_dyn)
    }

    fn current_thread_id(&self) -> ThreadId {
        ThreadId::new(CURRENT_THREAD_ID.get())
    }

    fn is_detached(&self) -> bool {
        self.detached
    }

    fn set_detached(&mut self, detached: bool) {
        self.detached = detached;
    }
}

/// Shared state fanned out between the public handle and the entry thunk.
struct StdThreadInner {
    /// Library-assigned token, 0 until `start()` succeeds
    id: AtomicU64,
    state: StateCell,
    panicked: AtomicBool,
    detached: bool,
    runnable: Arc<dyn Runnable>,
    /// Native join handle, `take()`n by the first join
    native: spin::Mutex<Option<thread::JoinHandle<()>>>,
}

impl StdThreadInner {
    /// Entry point of the native thread. `inner` is the thunk's own strong
    /// reference, independent of the caller's handle.
    fn thread_main(inner: Arc<StdThreadInner>) {
        // Guards against spurious or duplicate invocation.
        if inner.state.load() != LifecycleState::Starting {
            return;
        }
        inner.state.store(LifecycleState::Started);

        let id = inner.id.load(Ordering::Acquire);
        CURRENT_THREAD_ID.set(id);

        if catch_unwind(AssertUnwindSafe(|| inner.runnable.run())).is_err() {
            inner.panicked.store(true, Ordering::Release);
            tracing::error!(thread_id = id, "hosted task panicked");
        }

        // Leave any state another path already advanced past `Started`.
        inner
            .state
            .transition(LifecycleState::Started, LifecycleState::Stopping);
    }
}

/// Handle to a thread hosted on `std::thread`.
pub struct StdThread {
    inner: Arc<StdThreadInner>,
}

impl Thread for StdThread {
    fn start(&self) -> Result<(), SpawnError> {
        if !self
            .inner
            .state
            .transition(LifecycleState::Uninitialized, LifecycleState::Starting)
        {
            return Ok(());
        }

        let id = match next_thread_id() {
            Ok(id) => id,
            Err(e) => {
                self.inner.state.store(LifecycleState::Uninitialized);
                return Err(e);
            }
        };
        // Published before the spawn so the thunk reads its own id.
        self.inner.id.store(id, Ordering::Release);

        let entry = Arc::clone(&self.inner);
        let builder = thread::Builder::new().name(format!("native-thread-{id}"));
        let handle = match builder.spawn(move || StdThreadInner::thread_main(entry)) {
            Ok(handle) => handle,
            Err(e) => {
                self.inner.id.store(0, Ordering::Release);
                self.inner.state.store(LifecycleState::Uninitialized);
                return Err(SpawnError::ResourceExhausted(e));
            }
        };

        tracing::trace!(thread_id = id, detached = self.inner.detached, "thread started");

        if self.inner.detached {
            // Dropping the JoinHandle detaches; the thunk's Arc keeps the
            // inner alive until the task completes.
            drop(handle);
        } else {
            *self.inner.native.lock() = Some(handle);
        }
        Ok(())
    }

    fn join(&self) -> Result<(), JoinError> {
        if self.inner.detached || self.inner.state.load() == LifecycleState::Uninitialized {
            return Ok(());
        }

        // take() makes a second join an internal no-op.
        let handle = self.inner.native.lock().take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| JoinError::TaskPanicked)?;
            self.inner.state.store(LifecycleState::Stopped);
        }

        if self.inner.panicked.load(Ordering::Acquire) {
            return Err(JoinError::TaskPanicked);
        }
        Ok(())
    }

    fn id(&self) -> ThreadId {
        ThreadId::new(self.inner.id.load(Ordering::Acquire))
    }

    fn runnable(&self) -> Arc<dyn Runnable> {
        self.inner.runnable.clone()
    }

    fn state(&self) -> LifecycleState {
        self.inner.state.load()
    }
}

impl Drop for StdThread {
    fn drop(&mut self) {
        if self.inner.detached {
            return;
        }
        // Best effort: a destructor must not propagate failures.
        if let Err(e) = self.join() {
            tracing::warn!(thread_id = %self.id(), error = %e, "join during teardown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::FnRunnable;
    use portable_atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    #[test]
    fn test_new_thread_holds_runnable() {
        let factory = StdThreadFactory::new(false);
        let runnable = FnRunnable::new(|| {});
        let thread = factory
            .new_thread(runnable.clone() as Arc<dyn Runnable>)
            .unwrap();

        assert!(Arc::ptr_eq(
            &thread.runnable(),
            &(runnable.clone() as Arc<dyn Runnable>)
        ));
        assert_eq!(thread.state(), LifecycleState::Uninitialized);
        assert!(thread.id().is_unstarted());
    }

    #[test]
    fn test_back_reference_bound_by_factory() {
        let factory = StdThreadFactory::new(false);
        let runnable = FnRunnable::new(|| {});
        let thread = factory.new_thread(runnable.clone()).unwrap();

        let bound = runnable.thread().expect("factory binds the back reference");
        assert!(Arc::ptr_eq(&bound, &thread));

        drop(bound);
        drop(thread);
        assert!(runnable.thread().is_none(), "back reference is non-owning");
    }

    #[test]
    fn test_start_is_idempotent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let factory = StdThreadFactory::new(false);
        let thread = factory
            .new_thread(FnRunnable::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        thread.start().unwrap();
        thread.start().unwrap();
        thread.join().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_join_observes_task_completion() {
        let flag = Arc::new(AtomicBool::new(false));
        let seen = flag.clone();
        let factory = StdThreadFactory::new(false);
        let thread = factory
            .new_thread(FnRunnable::new(move || {
                thread::sleep(Duration::from_millis(20));
                seen.store(true, Ordering::SeqCst);
            }))
            .unwrap();

        thread.start().unwrap();
        thread.join().unwrap();

        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(thread.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_join_before_start_is_noop() {
        let factory = StdThreadFactory::new(false);
        let thread = factory.new_thread(FnRunnable::new(|| {})).unwrap();
        thread.join().unwrap();
        assert_eq!(thread.state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn test_detached_join_returns_immediately() {
        let factory = StdThreadFactory::new(true);
        let thread = factory
            .new_thread(FnRunnable::new(|| {
                thread::sleep(Duration::from_millis(200));
            }))
            .unwrap();

        thread.start().unwrap();
        let begin = Instant::now();
        thread.join().unwrap();
        assert!(begin.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_detached_handle_droppable_while_running() {
        let flag = Arc::new(AtomicBool::new(false));
        let seen = flag.clone();
        let factory = StdThreadFactory::new(true);
        let thread = factory
            .new_thread(FnRunnable::new(move || {
                thread::sleep(Duration::from_millis(30));
                seen.store(true, Ordering::SeqCst);
            }))
            .unwrap();

        thread.start().unwrap();
        drop(thread);

        let deadline = Instant::now() + Duration::from_secs(2);
        while !flag.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "detached task never completed");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_current_id_matches_handle_id() {
        let factory = StdThreadFactory::new(false);
        let observed = Arc::new(AtomicU64::new(0));
        let seen = observed.clone();
        let probe = factory.clone();
        let thread = factory
            .new_thread(FnRunnable::new(move || {
                seen.store(probe.current_thread_id().as_u64(), Ordering::SeqCst);
            }))
            .unwrap();

        thread.start().unwrap();
        thread.join().unwrap();

        assert!(!thread.id().is_unstarted());
        assert_eq!(observed.load(Ordering::SeqCst), thread.id().as_u64());
    }

    #[test]
    fn test_foreign_thread_reports_sentinel() {
        let factory = StdThreadFactory::default();
        // The test harness thread was not created by this backend.
        assert!(factory.current_thread_id().is_unstarted());
    }

    #[test]
    fn test_panicked_task_surfaces_on_join() {
        let factory = StdThreadFactory::new(false);
        let thread = factory
            .new_thread(FnRunnable::new(|| panic!("task failure")))
            .unwrap();

        thread.start().unwrap();
        let err = thread.join().unwrap_err();
        assert!(matches!(err, JoinError::TaskPanicked));
    }
}
