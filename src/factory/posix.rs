//! Factory backend built directly on POSIX threads.
//!
//! Exposes what `std::thread` hides: scheduler policy, a relative priority
//! scale resolved against the policy's native priority range, and the stack
//! size. Lifecycle semantics are identical to the std backend; only the
//! native primitive differs.
//!
//! Ownership across the FFI boundary: `pthread_create` receives a raw `Arc`
//! of the shared inner (`Arc::into_raw`), which the entry thunk reclaims with
//! `Arc::from_raw`. That raw pointer is the thunk's own strong reference,
//! independent of the caller's handle. If `pthread_create` fails the
//! reference is reclaimed on the spot and nothing leaks.

use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::{Arc, Weak};

use libc::{c_int, c_void};
use portable_atomic::{AtomicBool, AtomicU64, Ordering};

use crate::errors::{JoinError, SpawnError};
use crate::factory::ThreadFactory;
use crate::runnable::Runnable;
use crate::thread::{LifecycleState, StateCell, Thread, ThreadId};

/// POSIX scheduler policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// `SCHED_OTHER`, the default time-sharing policy
    Other,
    /// `SCHED_FIFO`, realtime first-in first-out
    Fifo,
    /// `SCHED_RR`, realtime round-robin
    RoundRobin,
}

impl Policy {
    fn to_native(self) -> c_int {
        match self {
            Policy::Other => libc::SCHED_OTHER,
            Policy::Fifo => libc::SCHED_FIFO,
            Policy::RoundRobin => libc::SCHED_RR,
        }
    }
}

/// Scheduler priority, relative to the chosen policy.
///
/// Absolute priority values depend on the policy and the OS. The named
/// levels pick a point within the policy's valid range without knowing its
/// bounds; `Increment` and `Decrement` request a nudge relative to `Normal`
/// rather than an absolute level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Lowest,
    Lower,
    Low,
    Normal,
    High,
    Higher,
    Highest,
    /// One step above `Normal` (resolves to `High`'s slot)
    Increment,
    /// One step below `Normal` (resolves to `Low`'s slot)
    Decrement,
}

impl Priority {
    /// Position on the seven-level scale, 0 (`Lowest`) to 6 (`Highest`).
    /// The relative markers take the slot one step from `Normal`.
    fn rank(self) -> i64 {
        match self {
            Priority::Lowest => 0,
            Priority::Lower => 1,
            Priority::Low | Priority::Decrement => 2,
            Priority::Normal => 3,
            Priority::High | Priority::Increment => 4,
            Priority::Higher => 5,
            Priority::Highest => 6,
        }
    }
}

/// Resolve a relative priority against the policy's native range.
///
/// The mapping is `min + (max - min) * rank / 6`: rank 0 requests the
/// policy's minimum, rank 6 its maximum, and a higher rank never yields a
/// lower native value. A policy whose range is a single value (`SCHED_OTHER`
/// on Linux) collapses every level to that value.
fn native_priority(policy: Policy, priority: Priority) -> c_int {
    let native = policy.to_native();
    let min = unsafe { libc::sched_get_priority_min(native) };
    let max = unsafe { libc::sched_get_priority_max(native) };
    if min == -1 || max == -1 || max < min {
        return 0;
    }
    let span = (max - min) as i64;
    (min as i64 + span * priority.rank() / 6) as c_int
}

/// A thread factory creating pthreads with explicit scheduling parameters.
///
/// All threads created by one factory share its policy, priority, stack size
/// and detached mode, snapshotted at `new_thread` time. Detached threads are
/// free-running: they release their system resources on completion and are
/// not joinable. By default threads are detached.
#[derive(Debug, Clone)]
pub struct PosixThreadFactory {
    policy: Policy,
    priority: Priority,
    stack_size_mb: usize,
    detached: bool,
}

impl PosixThreadFactory {
    pub fn new(policy: Policy, priority: Priority, stack_size_mb: usize, detached: bool) -> Self {
        PosixThreadFactory {
            policy,
            priority,
            stack_size_mb,
            detached,
        }
    }

    /// Convenience constructor matching the other factories: round-robin
    /// policy, normal priority, 1 MB stack.
    pub fn with_detached(detached: bool) -> Self {
        PosixThreadFactory::new(Policy::RoundRobin, Priority::Normal, 1, detached)
    }

    /// Stack size for newly created threads, in megabytes.
    pub fn stack_size(&self) -> usize {
        self.stack_size_mb
    }

    /// Set the stack size for newly created threads, in megabytes.
    pub fn set_stack_size(&mut self, mb: usize) {
        self.stack_size_mb = mb;
    }

    /// Priority relative to the current policy.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Set the priority for newly created threads.
    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }
}

impl Default for PosixThreadFactory {
    fn default() -> Self {
        PosixThreadFactory::with_detached(true)
    }
}

impl ThreadFactory for PosixThreadFactory {
    fn new_thread(&self, runnable: Arc<dyn Runnable>) -> Result<Arc<dyn Thread>, SpawnError> {
        if self.stack_size_mb == 0 {
            return Err(SpawnError::InvalidStackSize(0));
        }
        let stack_bytes = (self.stack_size_mb << 20).max(libc::PTHREAD_STACK_MIN);

        let thread = Arc::new(PosixThread {
            inner: Arc::new(PosixInner {
                id: AtomicU64::new(0),
                state: StateCell::new(),
                panicked: AtomicBool::new(false),
                detached: self.detached,
                native_policy: self.policy.to_native(),
                native_priority: native_priority(self.policy, self.priority),
                stack_bytes,
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
        ThreadId::new(unsafe { libc::pthread_self() } as u64)
    }

    fn is_detached(&self) -> bool {
        self.detached
    }

    fn set_detached(&mut self, detached: bool) {
        self.detached = detached;
    }
}

/// Shared state fanned out between the public handle and the entry thunk.
struct PosixInner {
    /// pthread handle value, 0 until `start()` succeeds
    id: AtomicU64,
    state: StateCell,
    panicked: AtomicBool,
    detached: bool,
    native_policy: c_int,
    native_priority: c_int,
    stack_bytes: usize,
    runnable: Arc<dyn Runnable>,
    /// Joinable pthread handle, `take()`n by the first join
    native: spin::Mutex<Option<libc::pthread_t>>,
}

/// Entry point handed to `pthread_create`. `arg` is a raw `Arc<PosixInner>`
/// produced by `Arc::into_raw`; reclaiming it here transfers the thunk's
/// strong reference into this scope.
extern "C" fn posix_thread_main(arg: *mut c_void) -> *mut c_void {
    let inner = unsafe { Arc::from_raw(arg as *const PosixInner) };

    // Guards against spurious or duplicate invocation.
    if inner.state.load() != LifecycleState::Starting {
        return ptr::null_mut();
    }
    inner.state.store(LifecycleState::Started);

    // The creating thread stores the same value once pthread_create returns;
    // publishing it here as well means the task never observes a stale
    // identity through its back reference.
    inner
        .id
        .store(unsafe { libc::pthread_self() } as u64, Ordering::Release);

    if catch_unwind(AssertUnwindSafe(|| inner.runnable.run())).is_err() {
        inner.panicked.store(true, Ordering::Release);
        tracing::error!(
            thread_id = inner.id.load(Ordering::Acquire),
            "hosted task panicked"
        );
    }

    // Leave any state another path already advanced past `Started`.
    inner
        .state
        .transition(LifecycleState::Started, LifecycleState::Stopping);
    ptr::null_mut()
}

/// Destroys a `pthread_attr_t` on every exit path.
struct AttrGuard(*mut libc::pthread_attr_t);

impl Drop for AttrGuard {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_attr_destroy(self.0);
        }
    }
}

/// Handle to a pthread-hosted thread.
pub struct PosixThread {
    inner: Arc<PosixInner>,
}

impl PosixThread {
    /// Configure an attr object and create the native thread.
    ///
    /// # Safety
    ///
    /// Must be called at most once per inner, after the state transition to
    /// `Starting` has been won.
    unsafe fn spawn_native(inner: &Arc<PosixInner>) -> Result<(), SpawnError> {
        let mut attr: libc::pthread_attr_t = unsafe { mem::zeroed() };
        let rc = unsafe { libc::pthread_attr_init(&mut attr) };
        if rc != 0 {
            return Err(SpawnError::from_os(rc));
        }
        let _guard = AttrGuard(&mut attr);

        let detach_state = if inner.detached {
            libc::PTHREAD_CREATE_DETACHED
        } else {
            libc::PTHREAD_CREATE_JOINABLE
        };
        let rc = unsafe { libc::pthread_attr_setdetachstate(&mut attr, detach_state) };
        if rc != 0 {
            return Err(SpawnError::from_os(rc));
        }

        let rc = unsafe { libc::pthread_attr_setstacksize(&mut attr, inner.stack_bytes) };
        if rc != 0 {
            return Err(SpawnError::InvalidStackSize(inner.stack_bytes >> 20));
        }

        // Scheduling parameters are requested through the attr object; the
        // inherit-sched mode is left at the platform default, so unprivileged
        // processes can still create threads under realtime policies.
        let rc = unsafe { libc::pthread_attr_setschedpolicy(&mut attr, inner.native_policy) };
        if rc != 0 {
            return Err(SpawnError::from_os(rc));
        }
        let mut param: libc::sched_param = unsafe { mem::zeroed() };
        param.sched_priority = inner.native_priority;
        let rc = unsafe { libc::pthread_attr_setschedparam(&mut attr, &param) };
        if rc != 0 {
            return Err(SpawnError::from_os(rc));
        }

        let arg = Arc::into_raw(Arc::clone(inner)) as *mut c_void;
        let mut handle: libc::pthread_t = unsafe { mem::zeroed() };
        let rc =
            unsafe { libc::pthread_create(&mut handle, &attr, posix_thread_main, arg) };
        if rc != 0 {
            // Reclaim the thunk's reference; the thread never existed.
            drop(unsafe { Arc::from_raw(arg as *const PosixInner) });
            return Err(SpawnError::from_os(rc));
        }

        inner.id.store(handle as u64, Ordering::Release);
        if !inner.detached {
            *inner.native.lock() = Some(handle);
        }

        tracing::trace!(
            thread_id = handle as u64,
            detached = inner.detached,
            "thread started"
        );
        Ok(())
    }
}

impl Thread for PosixThread {
    fn start(&self) -> Result<(), SpawnError> {
        if !self
            .inner
            .state
            .transition(LifecycleState::Uninitialized, LifecycleState::Starting)
        {
            return Ok(());
        }

        match unsafe { PosixThread::spawn_native(&self.inner) } {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.state.store(LifecycleState::Uninitialized);
                Err(e)
            }
        }
    }

    fn join(&self) -> Result<(), JoinError> {
        if self.inner.detached || self.inner.state.load() == LifecycleState::Uninitialized {
            return Ok(());
        }

        // take() makes a second join an internal no-op.
        let handle = self.inner.native.lock().take();
        if let Some(handle) = handle {
            let rc = unsafe { libc::pthread_join(handle, ptr::null_mut()) };
            if rc != 0 {
                return Err(JoinError::from_os(rc));
            }
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

impl Drop for PosixThread {
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
