//! Idle-worker registry shared by a [`Dispatcher`] and its [`Worker`]s.
//!
//! The registry is a bounded queue of [`WorkerSlot`]s. A worker publishes its
//! slot when it becomes idle; the dispatcher pulls a slot to hand that worker
//! exactly one job. Because the dispatcher removes a slot before the worker
//! executes and the worker re-registers only after finishing, a registry sized
//! to the worker count never holds the same worker twice and never fills up in
//! steady state.
//!
//! Synchronization is purely channel based. The receive side is shared by
//! every concurrent dispatch, so it sits behind an async mutex.
//!
//! [`Dispatcher`]: crate::Dispatcher
//! [`Worker`]: crate::Worker

use crate::{Error, Result};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// The private delivery channel of one idle worker.
///
/// Holding a slot means the worker is reserved: it is waiting on its channel
/// and will process whatever is delivered next.
pub struct WorkerSlot<J> {
    worker_id: usize,
    tx: mpsc::Sender<Option<J>>,
}

impl<J> WorkerSlot<J> {
    pub(crate) const fn new(worker_id: usize, tx: mpsc::Sender<Option<J>>) -> Self {
        Self { worker_id, tx }
    }

    /// Identifier of the worker that owns this slot.
    pub const fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Hands a job to the reserved worker.
    ///
    /// `None` is accepted and skipped by the worker, which then re-registers.
    ///
    /// # Errors
    ///
    /// Returns the job back if the worker stopped before receiving it.
    pub async fn deliver(self, job: impl Into<Option<J>>) -> Result<(), Option<J>> {
        self.tx.send(job.into()).await.map_err(|e| e.0)
    }
}

impl<J> Clone for WorkerSlot<J> {
    fn clone(&self) -> Self {
        Self {
            worker_id: self.worker_id,
            tx: self.tx.clone(),
        }
    }
}

/// A bounded registry of idle workers.
pub struct IdlePool<J> {
    tx: mpsc::Sender<WorkerSlot<J>>,
    rx: Mutex<mpsc::Receiver<WorkerSlot<J>>>,
    capacity: usize,
    closed: CancellationToken,
}

impl<J> IdlePool<J> {
    /// Creates a registry holding at most `capacity` idle workers.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. [`Dispatcher`](crate::Dispatcher)
    /// validates its worker count before building a registry.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
            closed: CancellationToken::new(),
        }
    }

    /// Advertises a worker as idle.
    ///
    /// Waits only if the registry is momentarily full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stopped`] once the registry has been closed.
    pub async fn register(&self, slot: WorkerSlot<J>) -> Result<()> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(Error::Stopped),
            res = self.tx.send(slot) => res.map_err(|_| Error::Stopped),
        }
    }

    /// Reserves an idle worker, waiting until one registers.
    ///
    /// Returns `None` once the registry is closed, including for callers that
    /// were already waiting. Idle slots left in a closed registry are never
    /// handed out, since their workers have been told to stop.
    pub async fn acquire(&self) -> Option<WorkerSlot<J>> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => None,
            slot = async { self.rx.lock().await.recv().await } => slot,
        }
    }

    /// Closes the registry. Pending and future [`acquire`](Self::acquire) and
    /// [`register`](Self::register) calls resolve immediately.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Number of workers currently registered as idle.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Returns `true` when no worker is idle.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of idle workers the registry holds.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
