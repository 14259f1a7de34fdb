//! A fixed set of consumers draining one bounded queue.
//!
//! Unlike the [`Dispatcher`](crate::Dispatcher) there is no per-worker
//! routing: every consumer pulls straight from the shared queue. Admission is
//! the interesting part. A job holds an admission permit from the moment it is
//! accepted until it has finished running, so at most `capacity` jobs are
//! buffered or executing at any time and [`TaskQueue::add_job`] waits once
//! that limit is reached.

use crate::{
    Error, Result,
    config::TaskQueueConfig,
    job::{Job, run_contained},
    task::drain,
};
use core::time::Duration;
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::{
    sync::CancellationToken,
    task::{TaskTracker, task_tracker::TaskTrackerToken},
};

/// A job admitted to the queue together with the slots it occupies.
///
/// Dropping it, whether after the job ran or because it was never received,
/// releases both the outstanding count and the admission permit.
struct Admitted<J> {
    job: J,
    _outstanding: TaskTrackerToken,
    _permit: OwnedSemaphorePermit,
}

type SharedReceiver<J> = Arc<AsyncMutex<mpsc::Receiver<Admitted<J>>>>;

/// Bounded background queue with a fixed number of consumer tasks.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> workqueue::Result<()> {
/// use workqueue::{BoxedJob, JobExt, TaskQueue, job};
///
/// let queue = TaskQueue::<BoxedJob>::new(8)?;
/// queue.start();
///
/// for id in 0..32 {
///     // waits whenever 8 jobs are already queued or running
///     let job = job::from_fn(move || async move { let _ = id; });
///     queue.add_job(job.boxed()).await?;
/// }
///
/// queue.shutdown(std::time::Duration::from_secs(5)).await?;
/// # Ok(())
/// # }
/// ```
pub struct TaskQueue<J> {
    config: TaskQueueConfig,
    tx: Mutex<Option<mpsc::Sender<Admitted<J>>>>,
    rx: SharedReceiver<J>,
    permits: Arc<Semaphore>,
    outstanding: TaskTracker,
    quit: Vec<CancellationToken>,
    started: AtomicBool,
}

impl<J: Job> TaskQueue<J> {
    /// Creates a queue admitting `len` jobs at a time, drained by `len`
    /// consumers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `len` is zero.
    pub fn new(len: usize) -> Result<Self> {
        Self::with_config(TaskQueueConfig::new(len))
    }

    /// Creates a queue from a full configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the capacity or the consumer count
    /// is zero.
    pub fn with_config(config: TaskQueueConfig) -> Result<Self> {
        config.validate()?;

        // The permits are the real bound; the channel only has to be large
        // enough that a permitted send never waits.
        let (tx, rx) = mpsc::channel(config.capacity);
        let quit = (0..config.workers).map(|_| CancellationToken::new()).collect();

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            rx: Arc::new(AsyncMutex::new(rx)),
            permits: Arc::new(Semaphore::new(config.capacity)),
            outstanding: TaskTracker::new(),
            quit,
            started: AtomicBool::new(false),
            config,
        })
    }

    /// Spawns the consumer tasks. Calling it again has no effect.
    ///
    /// Jobs added before `start` wait in the queue, and count against its
    /// capacity, until the consumers are running.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        for (consumer_id, quit) in self.quit.iter().enumerate() {
            tokio::spawn(consumer_loop(
                consumer_id,
                Arc::clone(&self.rx),
                quit.clone(),
            ));
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Task queue started ({} consumers, capacity {})",
            self.config.workers,
            self.config.capacity
        );
    }

    /// Adds a job, waiting while the queue is at capacity.
    ///
    /// The job counts as outstanding from the moment this is called, so a
    /// concurrent [`shutdown`](Self::shutdown) waits for it. `None` returns
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueClosed`] if the queue was shut down.
    pub async fn add_job(&self, job: impl Into<Option<J>>) -> Result<()> {
        let Some(job) = job.into() else {
            return Ok(());
        };

        let outstanding = self.outstanding.token();
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::QueueClosed)?;

        let tx = self.tx.lock().clone().ok_or(Error::QueueClosed)?;
        tx.send(Admitted {
            job,
            _outstanding: outstanding,
            _permit: permit,
        })
        .await
        .map_err(|_| Error::QueueClosed)
    }
}

impl<J> TaskQueue<J> {
    /// Waits up to `timeout` for every added job to finish, then stops the
    /// consumers.
    ///
    /// Call this once. Later [`add_job`](Self::add_job) calls fail with
    /// [`Error::QueueClosed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimeout`] if jobs are still outstanding when
    /// the deadline passes. The queue then stays open and the consumers keep
    /// running until the queue is dropped.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        drain(&self.outstanding, tokio::time::sleep(timeout)).await?;
        self.close();
        Ok(())
    }

    /// Like [`shutdown`](Self::shutdown), but gives up when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimeout`] if `cancel` fires first.
    pub async fn shutdown_with(&self, cancel: &CancellationToken) -> Result<()> {
        drain(&self.outstanding, cancel.cancelled()).await?;
        self.close();
        Ok(())
    }

    fn close(&self) {
        self.permits.close();
        self.tx.lock().take();
        for quit in &self.quit {
            quit.cancel();
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Task queue shut down");
    }

    /// Maximum number of jobs buffered or executing at once.
    pub const fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Number of consumer tasks.
    pub fn workers(&self) -> usize {
        self.quit.len()
    }

    /// Jobs added and not yet finished, including any still waiting for
    /// admission.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}

#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
async fn consumer_loop<J: Job>(
    consumer_id: usize,
    queue: SharedReceiver<J>,
    quit: CancellationToken,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Consumer {consumer_id} started");

    loop {
        let next = tokio::select! {
            () = quit.cancelled() => break,
            next = async { queue.lock().await.recv().await } => next,
        };

        // Every sender is gone: the queue was closed or dropped.
        let Some(Admitted {
            job,
            _outstanding,
            _permit,
        }) = next
        else {
            break;
        };

        run_contained(job).await;
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Consumer {consumer_id} stopped");
}
