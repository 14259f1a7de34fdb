use super::{
    config::{DrillConfig, Mode},
    jobs::SyntheticJob,
    telemetry,
};
use core::{fmt, time::Duration};
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::{sync::mpsc, time::Instant};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use workqueue::{Dispatcher, DispatcherConfig, Task, TaskQueue, TaskQueueConfig};

/// Outcome of one drill.
#[derive(Debug)]
pub struct Summary {
    pub mode: Mode,
    pub submitted: usize,
    pub completed: usize,
    pub elapsed: Duration,
    pub shutdown: workqueue::Result<()>,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shutdown = match &self.shutdown {
            Ok(()) => "clean".to_string(),
            Err(err) => err.to_string(),
        };
        write!(
            f,
            "mode={:?} submitted={} completed={} elapsed={:.3?} shutdown={}",
            self.mode, self.submitted, self.completed, self.elapsed, shutdown
        )
    }
}

/// Everything a mode needs to build jobs.
struct JobSource {
    duration: Duration,
    blocking: bool,
    completed: Arc<AtomicUsize>,
    pending: TaskTracker,
}

impl JobSource {
    fn new(config: &DrillConfig) -> Self {
        Self {
            duration: config.job_duration,
            blocking: config.blocking,
            completed: Arc::new(AtomicUsize::new(0)),
            pending: TaskTracker::new(),
        }
    }

    fn job(&self, id: usize) -> SyntheticJob {
        SyntheticJob::new(
            id,
            self.duration,
            self.blocking,
            Arc::clone(&self.completed),
            self.pending.token(),
        )
    }

    fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }
}

/// Runs one drill: submits `config.jobs` jobs to the selected pool, stopping
/// early if `interrupt` fires, then shuts the pool down.
///
/// # Errors
///
/// Returns an error only if the pool cannot be built. A shutdown that misses
/// its deadline is reported in [`Summary::shutdown`].
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(mode = ?config.mode, jobs = config.jobs)))]
pub async fn run(config: &DrillConfig, interrupt: CancellationToken) -> anyhow::Result<Summary> {
    let source = JobSource::new(config);
    let started = Instant::now();

    let (submitted, shutdown) = match config.mode {
        Mode::Dispatcher => run_dispatcher(config, &source, &interrupt).await?,
        Mode::TaskQueue => run_task_queue(config, &source, &interrupt).await?,
        Mode::Task => run_task(config, &source, &interrupt).await,
    };

    if let Err(_err) = &shutdown {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %_err, submitted, "Drill shutdown missed its deadline");
        telemetry::increment_shutdown_timeouts();
    }

    Ok(Summary {
        mode: config.mode,
        submitted,
        completed: source.completed(),
        elapsed: started.elapsed(),
        shutdown,
    })
}

async fn run_dispatcher(
    config: &DrillConfig,
    source: &JobSource,
    interrupt: &CancellationToken,
) -> anyhow::Result<(usize, workqueue::Result<()>)> {
    let dispatcher = Dispatcher::<SyntheticJob>::with_config(
        DispatcherConfig::new(config.workers).with_mode(config.dispatch_mode),
    )?;
    let (tx, rx) = mpsc::channel(config.queue_capacity);
    dispatcher.run_channel(rx)?;

    let mut submitted = 0;
    for id in 0..config.jobs {
        tokio::select! {
            biased;
            () = interrupt.cancelled() => break,
            res = tx.send(source.job(id)) => {
                if res.is_err() {
                    break;
                }
            }
        }
        submitted += 1;
        telemetry::increment_jobs_submitted();
    }
    drop(tx);

    // The dispatcher never waits for jobs itself; the drill's tracker does.
    source.pending.close();
    let drained = tokio::time::timeout(config.shutdown_timeout, source.pending.wait()).await;
    let shutdown = match drained {
        Ok(()) => dispatcher.shutdown(config.shutdown_timeout).await,
        Err(_) => {
            dispatcher.stop();
            Err(workqueue::Error::ShutdownTimeout {
                outstanding: source.pending.len(),
            })
        }
    };

    Ok((submitted, shutdown))
}

async fn run_task_queue(
    config: &DrillConfig,
    source: &JobSource,
    interrupt: &CancellationToken,
) -> anyhow::Result<(usize, workqueue::Result<()>)> {
    let queue = TaskQueue::<SyntheticJob>::with_config(
        TaskQueueConfig::new(config.queue_capacity).with_workers(config.workers),
    )?;
    queue.start();

    let mut submitted = 0;
    for id in 0..config.jobs {
        tokio::select! {
            biased;
            () = interrupt.cancelled() => break,
            res = queue.add_job(source.job(id)) => res?,
        }
        submitted += 1;
        telemetry::increment_jobs_submitted();
    }

    Ok((submitted, queue.shutdown(config.shutdown_timeout).await))
}

async fn run_task(
    config: &DrillConfig,
    source: &JobSource,
    interrupt: &CancellationToken,
) -> (usize, workqueue::Result<()>) {
    let task = Task::new();

    let mut submitted = 0;
    for id in 0..config.jobs {
        if interrupt.is_cancelled() {
            break;
        }
        task.run(source.job(id));
        submitted += 1;
        telemetry::increment_jobs_submitted();
    }

    (submitted, task.shutdown(config.shutdown_timeout).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use workqueue::DispatchMode;

    fn config(mode: Mode) -> DrillConfig {
        DrillConfig {
            mode,
            workers: 4,
            queue_capacity: 4,
            dispatch_mode: DispatchMode::Spawned,
            jobs: 16,
            job_duration: Duration::from_millis(50),
            blocking: false,
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_mode_completes_all_jobs() {
        for mode in [Mode::Dispatcher, Mode::TaskQueue, Mode::Task] {
            let summary = run(&config(mode), CancellationToken::new()).await.unwrap();
            assert_eq!(summary.submitted, 16, "{mode:?}");
            assert_eq!(summary.completed, 16, "{mode:?}");
            assert!(summary.shutdown.is_ok(), "{mode:?}: {summary}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn inline_dispatch_takes_one_round_per_worker_batch() {
        let config = DrillConfig {
            dispatch_mode: DispatchMode::Inline,
            ..config(Mode::Dispatcher)
        };
        let summary = run(&config, CancellationToken::new()).await.unwrap();
        assert_eq!(summary.completed, 16);
        // 16 jobs on 4 workers: four rounds of 50ms.
        assert!(summary.elapsed >= Duration::from_millis(200));
        assert!(summary.elapsed < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_jobs_time_out_in_every_mode() {
        for mode in [Mode::Dispatcher, Mode::TaskQueue, Mode::Task] {
            let config = DrillConfig {
                jobs: 4,
                job_duration: Duration::from_secs(60),
                shutdown_timeout: Duration::from_millis(100),
                ..config(mode)
            };
            let summary = run(&config, CancellationToken::new()).await.unwrap();
            assert!(
                summary
                    .shutdown
                    .as_ref()
                    .is_err_and(workqueue::Error::is_timeout),
                "{mode:?}: {summary}"
            );
            assert_eq!(summary.completed, 0);
        }
    }

    #[cfg(feature = "tracing")]
    #[tokio::test(start_paused = true)]
    async fn each_run_opens_a_span() {
        use std::sync::Mutex;
        use tracing::{Subscriber, span};
        use tracing_subscriber::{
            layer::{Context, Layer, SubscriberExt},
            registry::LookupSpan,
        };

        #[derive(Clone, Default)]
        struct SpanNames(Arc<Mutex<Vec<&'static str>>>);

        impl<S: Subscriber + for<'a> LookupSpan<'a>> Layer<S> for SpanNames {
            fn on_new_span(&self, attrs: &span::Attributes<'_>, _: &span::Id, _: Context<'_, S>) {
                self.0.lock().unwrap().push(attrs.metadata().name());
            }
        }

        let names = SpanNames::default();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(names.clone()),
        );

        run(&config(Mode::Task), CancellationToken::new()).await.unwrap();
        assert_eq!(names.0.lock().unwrap().as_slice(), ["run"]);
    }

    #[tokio::test]
    async fn interrupt_stops_submission() {
        let interrupt = CancellationToken::new();
        interrupt.cancel();
        for mode in [Mode::Dispatcher, Mode::TaskQueue, Mode::Task] {
            let summary = run(&config(mode), interrupt.clone()).await.unwrap();
            assert_eq!(summary.submitted, 0, "{mode:?}");
            assert!(summary.shutdown.is_ok());
        }
    }
}
