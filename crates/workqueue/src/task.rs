//! Fire-and-forget background work with a bounded wait on shutdown.

use crate::{
    Error, Result,
    job::{Job, run_contained},
};
use core::{future::Future, marker::PhantomData, time::Duration};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Runs individual jobs in the background and lets the owner wait for them
/// before exiting.
///
/// A `Task` is only an outstanding-job counter: every [`run`](Self::run)
/// spawns the job onto the runtime and counts it until it finishes. Nothing
/// bounds how many jobs run at once. Mixing job types on one `Task` goes
/// through [`BoxedJob`](crate::BoxedJob).
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> workqueue::Result<()> {
/// use workqueue::{Task, job};
///
/// let task = Task::new();
/// task.run(job::from_fn(|| async { /* record an audit event */ }));
/// task.shutdown(std::time::Duration::from_secs(1)).await?;
/// # Ok(())
/// # }
/// ```
pub struct Task<J> {
    tracker: TaskTracker,
    _job: PhantomData<fn(J)>,
}

impl<J> Default for Task<J> {
    fn default() -> Self {
        Self {
            tracker: TaskTracker::new(),
            _job: PhantomData,
        }
    }
}

impl<J: Job> Task<J> {
    /// Creates a `Task` with no outstanding jobs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `job` and counts it as outstanding until it returns.
    ///
    /// The count is released even if the job panics. `None` is ignored.
    pub fn run(&self, job: impl Into<Option<J>>) {
        let Some(job) = job.into() else {
            return;
        };
        self.tracker.spawn(run_contained(job));
    }

    /// Waits up to `timeout` for every job started by [`run`](Self::run) to
    /// finish.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimeout`] if jobs are still running when the
    /// deadline passes. They are not cancelled and keep running detached.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        drain(&self.tracker, tokio::time::sleep(timeout)).await
    }

    /// Like [`shutdown`](Self::shutdown), but gives up when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimeout`] if `cancel` fires first.
    pub async fn shutdown_with(&self, cancel: &CancellationToken) -> Result<()> {
        drain(&self.tracker, cancel.cancelled()).await
    }

    /// Number of jobs started and not yet finished.
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }
}

/// Waits for `tracker` to empty out or for `deadline` to resolve.
///
/// When both are ready at once, completion wins. The tracker stays closed
/// afterwards; tracked work that starts later is still counted.
pub(crate) async fn drain(tracker: &TaskTracker, deadline: impl Future<Output = ()>) -> Result<()> {
    tracker.close();

    tokio::select! {
        biased;
        () = tracker.wait() => Ok(()),
        () = deadline => {
            let outstanding = tracker.len();
            #[cfg(feature = "tracing")]
            tracing::warn!("Shutdown deadline reached with {outstanding} job(s) outstanding");
            Err(Error::ShutdownTimeout { outstanding })
        }
    }
}
