//! Error types for the job-execution subsystem.
//!
//! Job-level failures never surface here: a job owns its own error handling,
//! and a panicking job is contained by the pool that runs it. The errors below
//! describe the pools themselves.
//!
//! ## Error Cases
//! - `ShutdownTimeout`: outstanding work did not drain before the caller's
//!   deadline.
//! - `InvalidConfig`: a pool was configured with zero workers or capacity.
//! - `QueueClosed`: a job was submitted after the queue was shut down.
//! - `AlreadyRunning`: a dispatcher was started twice.
//! - `Stopped`: a dispatcher was started after it was stopped.

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the worker pools.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The deadline elapsed before outstanding work reached zero.
    ///
    /// `outstanding` is a snapshot taken when the deadline fired. The work
    /// itself is not cancelled and keeps running detached.
    #[error("timeout: {outstanding} job(s) still outstanding")]
    ShutdownTimeout { outstanding: usize },

    /// The pool configuration was rejected at construction time.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The task queue no longer accepts jobs.
    #[error("Task queue is closed")]
    QueueClosed,

    /// `Dispatcher::run` was called more than once.
    #[error("Dispatcher is already running")]
    AlreadyRunning,

    /// The dispatcher has been stopped and cannot be restarted.
    #[error("Dispatcher has been stopped")]
    Stopped,
}

impl Error {
    /// Returns `true` if this error reports a shutdown deadline expiring.
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::ShutdownTimeout { .. })
    }
}
