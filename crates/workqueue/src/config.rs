//! Pool configuration.
//!
//! Both pools validate their configuration at construction and reject zero
//! sizes with [`Error::InvalidConfig`]. A zero-sized pool would accept jobs
//! that can never run.

use crate::{Error, Result};

/// How a [`Dispatcher`](crate::Dispatcher) hands inbound jobs to workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DispatchMode {
    /// Spawn one task per inbound job that waits for an idle worker.
    ///
    /// The dispatch loop never waits on worker availability, which keeps
    /// dispatch latency low. The cost is that a sustained burst with no idle
    /// workers creates one waiting task per job with no upper bound; the only
    /// backpressure is the capacity of the inbound channel.
    #[default]
    Spawned,

    /// Wait for an idle worker inside the dispatch loop before reading the
    /// next inbound job.
    ///
    /// At most one job is pending dispatch at any time, so concurrency is
    /// bounded by the worker count. Inbound jobs queue in the inbound channel
    /// instead of in spawned tasks.
    Inline,
}

/// Configuration for a [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Number of workers, which is also the idle-registry capacity.
    pub workers: usize,
    /// Dispatch strategy.
    pub mode: DispatchMode,
}

impl DispatcherConfig {
    /// A dispatcher with `workers` workers and [`DispatchMode::Spawned`].
    pub const fn new(workers: usize) -> Self {
        Self {
            workers,
            mode: DispatchMode::Spawned,
        }
    }

    /// Sets the dispatch strategy.
    #[must_use]
    pub const fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `workers` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig {
                reason: "workers must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration for a [`TaskQueue`](crate::TaskQueue).
///
/// [`TaskQueueConfig::new`] uses one size for both how many jobs may be queued
/// or running and how many consumer tasks drain the queue.
/// [`with_workers`](Self::with_workers) sets the consumer count independently
/// when the two should differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQueueConfig {
    /// Maximum number of jobs buffered or executing at once.
    pub capacity: usize,
    /// Number of persistent consumer tasks.
    pub workers: usize,
}

impl TaskQueueConfig {
    /// A queue of `len` slots drained by `len` consumers.
    pub const fn new(len: usize) -> Self {
        Self {
            capacity: len,
            workers: len,
        }
    }

    /// Sets the number of consumer tasks.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the admission capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `capacity` or `workers` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfig {
                reason: "capacity must be greater than 0".to_string(),
            });
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig {
                reason: "workers must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}
