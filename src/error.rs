//! Error taxonomy.
//!
//! Each primitive reports its own error type next to where it is defined
//! (channel errors in [`crate::channel`], lock misuse in [`crate::sync`]).
//! The cross-cutting ones live here, together with the aggregate [`Error`]
//! for callers that want a single `?`-friendly type.

use crate::runtime::DeadlockReport;
use std::time::Duration;
use thiserror::Error;

pub use crate::channel::error::{CloseError, SendError, TryRecvError, TrySendError};
pub use crate::sync::mutex::{TryLockError, UnlockError};
pub use crate::sync::wait_group::WaitGroupError;

/// Why a context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ContextError {
    /// Cancelled explicitly, or by an ancestor.
    #[error("context cancelled")]
    Cancelled,
    /// The effective deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// A spawned task did not produce its value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// The task panicked. Carries the panic message when it was a string.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The runtime shut down before the task finished.
    #[error("runtime shut down before task completed")]
    Shutdown,
    /// The runtime detected a global deadlock and aborted the task.
    #[error("task aborted: runtime deadlock")]
    Deadlock,
}

impl JoinError {
    /// Returns true if the task panicked.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

/// Runtime failures surfaced by `block_on` and the builder.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Every live task was blocked with no pending wakeup source.
    #[error("{0}")]
    Deadlock(DeadlockReport),
    /// The root future did not complete.
    #[error("root task failed: {0}")]
    Join(JoinError),
    /// Spawning a worker or driver thread failed.
    #[error("failed to spawn runtime thread: {0}")]
    Spawn(#[source] std::io::Error),
    /// The runtime configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// `block_on` was called from a thread that is itself a worker.
    #[error("block_on called from inside a runtime worker")]
    BlockOnInsideRuntime,
}

impl RuntimeError {
    /// Returns the deadlock report if this is a deadlock.
    #[must_use]
    pub const fn deadlock(&self) -> Option<&DeadlockReport> {
        match self {
            Self::Deadlock(report) => Some(report),
            _ => None,
        }
    }
}

/// Worker pool construction failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// A pool needs at least one worker.
    #[error("worker pool requires at least one worker")]
    NoWorkers,
}

/// A `timeout` elapsed before the inner future completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline elapsed after {0:?}")]
pub struct Elapsed(pub Duration);

/// Invalid runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `worker_threads` was zero.
    #[error("worker_threads must be at least 1")]
    ZeroWorkers,
    /// `time_slice` was zero.
    #[error("time_slice must be non-zero")]
    ZeroTimeSlice,
    /// `deadline_resolution` was zero.
    #[error("deadline_resolution must be non-zero")]
    ZeroResolution,
    /// `deadlock_check_interval` was `Some(0)`.
    #[error("deadlock_check_interval must be non-zero when set")]
    ZeroDeadlockInterval,
    /// Reading a config file failed.
    #[cfg(feature = "config-file")]
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// A config file did not parse.
    #[cfg(feature = "config-file")]
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Aggregate error for applications that mix primitives.
#[derive(Debug, Error)]
pub enum Error {
    /// A send or receive hit a closed channel.
    #[error("channel closed")]
    ChannelClosed,
    /// Closing a channel failed.
    #[error(transparent)]
    Close(#[from] CloseError),
    /// Mutex misuse.
    #[error(transparent)]
    Unlock(#[from] UnlockError),
    /// WaitGroup misuse.
    #[error(transparent)]
    WaitGroup(#[from] WaitGroupError),
    /// A context was done.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// A joined task failed.
    #[error(transparent)]
    Join(#[from] JoinError),
    /// A runtime failure, including deadlock.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    /// Pool construction failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// A timeout elapsed.
    #[error(transparent)]
    Elapsed(#[from] Elapsed),
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl<T> From<SendError<T>> for Error {
    fn from(_: SendError<T>) -> Self {
        Self::ChannelClosed
    }
}

/// `Result` with [`Error`] as the default error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
