//! Dispatcher-driven worker pool.
//!
//! A [`Dispatcher`] owns a fixed set of [`Worker`]s and the [`IdlePool`] they
//! register into. It reads jobs from an inbound stream and forwards each to
//! whichever worker is idle.
//!
//! ```text
//!  inbound ──► dispatch loop ──► acquire idle slot ──► worker channel ──► Job::process
//!                                      ▲                                       │
//!                                      └────────── re-register ◄───────────────┘
//! ```
//!
//! Admission control comes only from the inbound channel's capacity; the
//! dispatcher adds none of its own. See [`DispatchMode`] for how waiting for an
//! idle worker is handled.

use crate::{
    Error, Result,
    config::{DispatchMode, DispatcherConfig},
    job::Job,
    registry::{IdlePool, WorkerSlot},
    state::{PoolState, StateCell},
    worker::Worker,
};
use core::{pin::pin, time::Duration};
use futures::{Stream, StreamExt, future::join_all};
use std::sync::Arc;
use tokio::{sync::mpsc, time::timeout};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Routes inbound jobs to a fixed set of workers.
///
/// # Example
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> workqueue::Result<()> {
/// use workqueue::{BoxedJob, Dispatcher, JobExt, job};
///
/// let dispatcher = Dispatcher::<BoxedJob>::new(4)?;
/// let (tx, rx) = tokio::sync::mpsc::channel(16);
/// dispatcher.run_channel(rx)?;
///
/// let mail = job::from_fn(|| async { /* deliver a mail */ });
/// tx.send(mail.boxed()).await.unwrap();
///
/// dispatcher.shutdown(std::time::Duration::from_secs(1)).await?;
/// # Ok(())
/// # }
/// ```
pub struct Dispatcher<J> {
    config: DispatcherConfig,
    workers: Vec<Worker<J>>,
    pool: Arc<IdlePool<J>>,
    state: StateCell,
    stop_token: CancellationToken,
}

impl<J: Job> Dispatcher<J> {
    /// Creates a dispatcher with `workers` workers in
    /// [`DispatchMode::Spawned`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `workers` is zero.
    pub fn new(workers: usize) -> Result<Self> {
        Self::with_config(DispatcherConfig::new(workers))
    }

    /// Creates a dispatcher from a full configuration.
    ///
    /// Workers are constructed here but only started by [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    pub fn with_config(config: DispatcherConfig) -> Result<Self> {
        config.validate()?;

        let pool = Arc::new(IdlePool::new(config.workers));
        let workers = (0..config.workers)
            .map(|id| Worker::new(id, Arc::clone(&pool)))
            .collect();

        Ok(Self {
            config,
            workers,
            pool,
            state: StateCell::new(),
            stop_token: CancellationToken::new(),
        })
    }

    /// Starts all workers and the dispatch loop, then returns.
    ///
    /// Every item read from `inbound` is converted into an `Option<J>`;
    /// `None` items are skipped without reserving a worker. The dispatch loop
    /// ends when `inbound` is exhausted or the dispatcher is stopped. Workers
    /// keep running until [`stop`](Self::stop).
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if called more than once.
    /// - [`Error::Stopped`] if the dispatcher was already stopped.
    pub fn run<S, T>(&self, inbound: S) -> Result<()>
    where
        S: Stream<Item = T> + Send + 'static,
        T: Into<Option<J>> + Send + 'static,
    {
        self.state
            .transition(PoolState::Idle, PoolState::Running)
            .map_err(|state| match state {
                PoolState::Running => Error::AlreadyRunning,
                _ => Error::Stopped,
            })?;

        for worker in &self.workers {
            worker.start();
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Dispatcher started with {} workers ({:?} dispatch)",
            self.config.workers,
            self.config.mode
        );

        tokio::spawn(dispatch_loop(
            inbound,
            Arc::clone(&self.pool),
            self.config.mode,
            self.stop_token.clone(),
        ));

        Ok(())
    }

    /// [`run`](Self::run) over a tokio channel receiver.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub fn run_channel<T>(&self, inbound: mpsc::Receiver<T>) -> Result<()>
    where
        T: Into<Option<J>> + Send + 'static,
    {
        self.run(ReceiverStream::new(inbound))
    }

    /// Stops the dispatcher and waits up to `timeout` for every worker loop to
    /// exit.
    ///
    /// This is the acknowledged form of [`stop`](Self::stop). A worker in the
    /// middle of a job exits once that job completes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimeout`] with the number of workers still
    /// running if the deadline passes first. Those workers are not aborted.
    pub async fn shutdown(&self, timeout_after: Duration) -> Result<()> {
        self.stop();

        let joins = join_all(self.workers.iter().map(Worker::join));
        if timeout(timeout_after, joins).await.is_ok() {
            #[cfg(feature = "tracing")]
            tracing::info!("Dispatcher shutdown complete");
            return Ok(());
        }

        let outstanding = self
            .workers
            .iter()
            .filter(|w| w.is_started() && !w.is_finished())
            .count();

        #[cfg(feature = "tracing")]
        tracing::warn!("Dispatcher shutdown timed out ({outstanding} workers still busy)");

        Err(Error::ShutdownTimeout { outstanding })
    }
}

impl<J> Dispatcher<J> {
    /// Stops the dispatcher without waiting.
    ///
    /// Refuses further dispatch, sends a quit signal to every worker and
    /// closes the idle registry. Dispatches still waiting for an idle worker
    /// give up and drop their job. A worker that is busy, or that receives a
    /// job in the same instant, may finish that one job before it exits;
    /// nothing here waits for that. Calling `stop` again has no effect.
    pub fn stop(&self) {
        if self.state.advance(PoolState::Draining) >= PoolState::Draining {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Stopping dispatcher ({} idle workers)", self.pool.len());

        self.stop_token.cancel();
        for worker in &self.workers {
            worker.stop();
        }
        self.pool.close();

        self.state.advance(PoolState::Stopped);
    }

    /// Number of workers owned by this dispatcher.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of workers currently registered as idle.
    pub fn idle_workers(&self) -> usize {
        self.pool.len()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PoolState {
        self.state.get()
    }

    /// The configuration this dispatcher was built with.
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }
}

impl<J> Drop for Dispatcher<J> {
    fn drop(&mut self) {
        // Workers hold the registry, not the dispatcher, so they would outlive
        // it without an explicit quit.
        self.stop();
    }
}

async fn dispatch_loop<J, S, T>(
    inbound: S,
    pool: Arc<IdlePool<J>>,
    mode: DispatchMode,
    stop: CancellationToken,
) where
    J: Job,
    S: Stream<Item = T>,
    T: Into<Option<J>>,
{
    let mut inbound = pin!(inbound);

    loop {
        let next = tokio::select! {
            biased;
            () = stop.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Dispatcher stopped, refusing further inbound jobs");
                break;
            }
            next = inbound.next() => next,
        };

        let Some(item) = next else {
            #[cfg(feature = "tracing")]
            tracing::debug!("Inbound job stream closed");
            break;
        };

        let Some(job) = item.into() else {
            #[cfg(feature = "tracing")]
            tracing::trace!("Skipping absent job");
            continue;
        };

        match mode {
            DispatchMode::Spawned => {
                tokio::spawn(send_job_to_worker(Arc::clone(&pool), job));
            }
            DispatchMode::Inline => {
                let slot = tokio::select! {
                    biased;
                    () = stop.cancelled() => None,
                    slot = pool.acquire() => slot,
                };
                let Some(slot) = slot else {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Dropping job: dispatcher stopped before a worker became idle");
                    break;
                };
                forward(slot, job).await;
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Dispatch loop exited");
}

async fn send_job_to_worker<J: Job>(pool: Arc<IdlePool<J>>, job: J) {
    match pool.acquire().await {
        Some(slot) => forward(slot, job).await,
        None => {
            #[cfg(feature = "tracing")]
            tracing::warn!("Dropping job: dispatcher stopped before a worker became idle");
        }
    }
}

async fn forward<J: Job>(slot: WorkerSlot<J>, job: J) {
    let _worker_id = slot.worker_id();
    if slot.deliver(job).await.is_err() {
        #[cfg(feature = "tracing")]
        tracing::warn!("Worker {_worker_id} stopped before receiving its job");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{BoxedJob, JobExt, from_fn};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(hits: &Arc<AtomicUsize>) -> BoxedJob {
        let hits = Arc::clone(hits);
        from_fn(move || async move {
            hits.fetch_add(1, Ordering::SeqCst);
        })
        .boxed()
    }

    async fn wait_for(hits: &AtomicUsize, n: usize) {
        timeout(Duration::from_secs(2), async {
            while hits.load(Ordering::SeqCst) < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("jobs did not complete");
    }

    #[test]
    fn zero_workers_is_invalid() {
        assert!(matches!(
            Dispatcher::<BoxedJob>::new(0),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_job_is_processed_once() {
        let dispatcher = Dispatcher::<BoxedJob>::new(3).unwrap();
        let (tx, rx) = mpsc::channel(8);
        dispatcher.run_channel(rx).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            tx.send(counting_job(&hits)).await.ok();
        }

        wait_for(&hits, 50).await;
        assert_eq!(hits.load(Ordering::SeqCst), 50);
        assert!(dispatcher.shutdown(Duration::from_secs(1)).await.is_ok());
        assert_eq!(dispatcher.state(), PoolState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn inline_mode_processes_every_job() {
        let config = DispatcherConfig::new(2).with_mode(DispatchMode::Inline);
        let dispatcher = Dispatcher::<BoxedJob>::with_config(config).unwrap();
        let (tx, rx) = mpsc::channel(4);
        dispatcher.run_channel(rx).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            tx.send(counting_job(&hits)).await.ok();
        }

        wait_for(&hits, 20).await;
        dispatcher.stop();
    }

    #[tokio::test]
    async fn absent_jobs_are_skipped() {
        let dispatcher = Dispatcher::<BoxedJob>::new(1).unwrap();
        let (tx, rx) = mpsc::channel::<Option<BoxedJob>>(4);
        dispatcher.run_channel(rx).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        tx.send(None).await.ok();
        tx.send(None).await.ok();
        tx.send(Some(counting_job(&hits))).await.ok();

        wait_for(&hits, 1).await;
        timeout(Duration::from_secs(1), async {
            while dispatcher.idle_workers() < 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        dispatcher.stop();
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let dispatcher = Dispatcher::<BoxedJob>::new(1).unwrap();
        dispatcher.run(futures::stream::empty::<BoxedJob>()).unwrap();
        assert_eq!(
            dispatcher
                .run(futures::stream::empty::<BoxedJob>())
                .unwrap_err(),
            Error::AlreadyRunning
        );

        dispatcher.stop();
        assert_eq!(dispatcher.state(), PoolState::Stopped);
    }

    #[tokio::test]
    async fn run_after_stop_is_rejected() {
        let dispatcher = Dispatcher::<BoxedJob>::new(1).unwrap();
        dispatcher.stop();
        assert_eq!(
            dispatcher
                .run(futures::stream::empty::<BoxedJob>())
                .unwrap_err(),
            Error::Stopped
        );
    }

    #[tokio::test]
    async fn jobs_sent_after_stop_are_refused() {
        let dispatcher = Dispatcher::<BoxedJob>::new(2).unwrap();
        let (tx, rx) = mpsc::channel(8);
        dispatcher.run_channel(rx).unwrap();
        dispatcher.stop();

        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            tx.send(counting_job(&hits)).await.ok();
        }
        assert!(dispatcher.shutdown(Duration::from_secs(1)).await.is_ok());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_never_blocks() {
        let dispatcher = Dispatcher::<BoxedJob>::new(2).unwrap();
        dispatcher.run(futures::stream::pending::<BoxedJob>()).unwrap();
        dispatcher.stop();
        dispatcher.stop();
        assert_eq!(dispatcher.state(), PoolState::Stopped);
        assert!(dispatcher.shutdown(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn jobs_waiting_for_a_worker_are_dropped_on_stop() {
        let dispatcher = Dispatcher::<BoxedJob>::new(1).unwrap();
        let (tx, rx) = mpsc::channel(8);
        dispatcher.run_channel(rx).unwrap();

        // Occupy the only worker until released.
        let release = CancellationToken::new();
        let started = Arc::new(AtomicUsize::new(0));
        let blocker = {
            let release = release.clone();
            let started = Arc::clone(&started);
            from_fn(move || async move {
                started.fetch_add(1, Ordering::SeqCst);
                release.cancelled().await;
            })
            .boxed()
        };
        tx.send(blocker).await.ok();
        wait_for(&started, 1).await;

        // These wait for an idle worker that never comes back.
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            tx.send(counting_job(&hits)).await.ok();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        dispatcher.stop();
        release.cancel();

        assert!(dispatcher.shutdown(Duration::from_secs(1)).await.is_ok());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
