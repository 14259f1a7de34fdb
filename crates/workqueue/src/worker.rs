use crate::{
    job::{Job, run_contained},
    registry::{IdlePool, WorkerSlot},
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A single worker that executes jobs delivered through a private channel.
///
/// Once started, the worker loops: it publishes its [`WorkerSlot`] into the
/// shared [`IdlePool`] to advertise that it is idle, then waits for either a
/// job on its private channel or a quit signal. A job is run to completion
/// before the worker re-registers, so a worker is never in the registry while
/// it is busy.
///
/// Workers are normally created and owned by a [`Dispatcher`]. They are
/// public so that custom routing can be built on the same registry.
///
/// [`Dispatcher`]: crate::Dispatcher
pub struct Worker<J> {
    id: usize,
    pool: Arc<IdlePool<J>>,
    quit: CancellationToken,
    done: CancellationToken,
    channel: Mutex<Option<(mpsc::Sender<Option<J>>, mpsc::Receiver<Option<J>>)>>,
}

impl<J: Job> Worker<J> {
    /// Creates a worker that will register into `pool`.
    pub fn new(id: usize, pool: Arc<IdlePool<J>>) -> Self {
        // At most one job is ever in flight towards a worker: it is only
        // reachable through its slot, and the slot is consumed on delivery.
        let (tx, rx) = mpsc::channel(1);
        Self {
            id,
            pool,
            quit: CancellationToken::new(),
            done: CancellationToken::new(),
            channel: Mutex::new(Some((tx, rx))),
        }
    }

    /// Worker identifier.
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Spawns the worker loop onto the current tokio runtime.
    ///
    /// Calling `start` on a running or stopped worker does nothing.
    pub fn start(&self) {
        let Some((tx, rx)) = self.channel.lock().take() else {
            return;
        };

        tokio::spawn(worker_loop(
            self.id,
            tx,
            rx,
            Arc::clone(&self.pool),
            self.quit.clone(),
            self.done.clone(),
        ));
    }
}

impl<J> Worker<J> {
    /// Asks the worker to stop and returns immediately.
    ///
    /// Stop is best-effort: the quit signal races any job delivered at the
    /// same moment, so the worker may still process one more job before it
    /// exits. Use [`join`](Self::join) to wait for the loop to finish.
    pub fn stop(&self) {
        self.quit.cancel();
    }

    /// Returns `true` if [`start`](Self::start) has been called.
    pub fn is_started(&self) -> bool {
        self.channel.lock().is_none()
    }

    /// Returns `true` once the worker loop has exited.
    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Waits for the worker loop to exit.
    ///
    /// Only meaningful after [`stop`](Self::stop). Returns immediately if the
    /// worker was never started.
    pub async fn join(&self) {
        if self.is_started() {
            self.done.cancelled().await;
        }
    }
}

/// The worker loop. Runs until quit is signalled or the registry closes.
async fn worker_loop<J: Job>(
    worker_id: usize,
    tx: mpsc::Sender<Option<J>>,
    mut rx: mpsc::Receiver<Option<J>>,
    pool: Arc<IdlePool<J>>,
    quit: CancellationToken,
    done: CancellationToken,
) {
    // Signals `join` on every exit path, including a panic in the loop.
    let _done = done.drop_guard();

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started");

    loop {
        // Advertise availability. This only waits if the registry is full,
        // which cannot happen while each worker registers at most once.
        let slot = WorkerSlot::new(worker_id, tx.clone());
        tokio::select! {
            res = pool.register(slot) => {
                if res.is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Worker {worker_id} found the registry closed");
                    break;
                }
            }
            () = quit.cancelled() => break,
        }

        // Quit and job arrival are polled in random order.
        tokio::select! {
            work = rx.recv() => match work {
                Some(Some(job)) => run_contained(job).await,
                Some(None) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Worker {worker_id} skipped an absent job");
                }
                None => break,
            },
            () = quit.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Worker {worker_id} received quit signal");
                break;
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} stopped");
}
