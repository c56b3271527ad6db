//! Error handling for the thread factory layer.
//!
//! Errors are split per concern: [`SpawnError`] for native thread creation,
//! [`JoinError`] for waiting on completion. [`ThreadError`] is the umbrella
//! type for callers that compose both.
//!
//! Nothing in this layer retries. Creation failures surface to the caller of
//! `new_thread`/`start`; join failures during teardown are swallowed by the
//! owning handle (a destructor must not propagate) and only logged.

use std::io;

use thiserror::Error;

/// Result type for threading operations.
pub type ThreadResult<T> = Result<T, ThreadError>;

/// Umbrella error type for all threading operations.
#[derive(Debug, Error)]
pub enum ThreadError {
    /// Thread spawning errors
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    /// Thread joining errors
    #[error(transparent)]
    Join(#[from] JoinError),
}

/// Errors that can occur while creating or starting a native thread.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The operating system refused to allocate the native thread
    /// (thread limit, memory pressure, or an attribute the OS rejected).
    #[error("native thread creation failed: {0}")]
    ResourceExhausted(#[source] io::Error),
    /// Stack size configuration the backend cannot honor.
    #[error("invalid stack size: {0} MB")]
    InvalidStackSize(usize),
}

/// Errors that can occur while joining a thread.
#[derive(Debug, Error)]
pub enum JoinError {
    /// The hosted task panicked. The thread itself completed and its
    /// native resources were released.
    #[error("hosted task panicked")]
    TaskPanicked,
    /// The native join primitive failed (e.g. `EDEADLK`).
    #[error("native join failed: {0}")]
    Os(#[source] io::Error),
}

impl SpawnError {
    /// Wrap a raw OS error code from a pthread call.
    #[cfg(all(unix, feature = "posix"))]
    pub(crate) fn from_os(code: i32) -> Self {
        SpawnError::ResourceExhausted(io::Error::from_raw_os_error(code))
    }
}

impl JoinError {
    /// Wrap a raw OS error code from a pthread call.
    #[cfg(all(unix, feature = "posix"))]
    pub(crate) fn from_os(code: i32) -> Self {
        JoinError::Os(io::Error::from_raw_os_error(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions() {
        let spawn: ThreadError = SpawnError::InvalidStackSize(0).into();
        assert!(matches!(spawn, ThreadError::Spawn(_)));

        let join: ThreadError = JoinError::TaskPanicked.into();
        assert!(matches!(join, ThreadError::Join(_)));
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            SpawnError::InvalidStackSize(0).to_string(),
            "invalid stack size: 0 MB"
        );
        assert_eq!(JoinError::TaskPanicked.to_string(), "hosted task panicked");
    }
}
