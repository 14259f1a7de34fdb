use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::{runtime::Builder, sync::mpsc};
use workqueue::{
    BoxedJob, DispatchMode, Dispatcher, DispatcherConfig, Job, JobExt, Task, TaskQueue,
    TaskQueueConfig,
};

// Number of jobs pushed through a pool per benchmark iteration.
const TOTAL_JOBS: usize = 4096;

/// A job that only bumps a counter, so the numbers reflect pool overhead.
struct Tick(Arc<AtomicUsize>);

impl Job for Tick {
    async fn process(self) {
        black_box(self.0.fetch_add(1, Ordering::Relaxed));
    }
}

async fn wait_for(counter: &AtomicUsize, n: usize) {
    while counter.load(Ordering::Relaxed) < n {
        tokio::task::yield_now().await;
    }
}

/// Pushes jobs through a dispatcher until every one has run.
fn bench_dispatcher(c: &mut Criterion, group_name: &str, mode: DispatchMode) {
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_JOBS as u64));

    for workers in [1, 4, 16, 64] {
        group.bench_function(format!("jobs/{TOTAL_JOBS}/workers/{workers}"), |b| {
            let rt = Builder::new_multi_thread().enable_all().build().unwrap();

            b.to_async(&rt).iter_custom(|iters| async move {
                let mut total = Duration::ZERO;

                for _ in 0..iters {
                    let config = DispatcherConfig::new(workers).with_mode(mode);
                    let dispatcher = Dispatcher::<Tick>::with_config(config).unwrap();
                    let (tx, rx) = mpsc::channel(workers);
                    dispatcher.run_channel(rx).unwrap();
                    let counter = Arc::new(AtomicUsize::new(0));

                    let start = Instant::now();
                    for _ in 0..TOTAL_JOBS {
                        tx.send(Tick(Arc::clone(&counter))).await.unwrap();
                    }
                    wait_for(&counter, TOTAL_JOBS).await;
                    total += start.elapsed();

                    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
                }

                total
            });
        });
    }

    group.finish();
}

/// Pushes jobs through a task queue and waits for the drain.
fn bench_task_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("task_queue");
    group.throughput(Throughput::Elements(TOTAL_JOBS as u64));

    for (capacity, workers) in [(1, 1), (16, 4), (64, 16), (256, 64)] {
        group.bench_function(
            format!("jobs/{TOTAL_JOBS}/capacity/{capacity}/workers/{workers}"),
            |b| {
                let rt = Builder::new_multi_thread().enable_all().build().unwrap();

                b.to_async(&rt).iter_custom(|iters| async move {
                    let start = Instant::now();

                    for _ in 0..iters {
                        let config = TaskQueueConfig::new(capacity).with_workers(workers);
                        let queue = TaskQueue::<BoxedJob>::with_config(config).unwrap();
                        queue.start();
                        let counter = Arc::new(AtomicUsize::new(0));

                        for _ in 0..TOTAL_JOBS {
                            queue
                                .add_job(Tick(Arc::clone(&counter)).boxed())
                                .await
                                .unwrap();
                        }
                        queue.shutdown(Duration::from_secs(5)).await.unwrap();
                    }

                    start.elapsed()
                });
            },
        );
    }

    group.finish();
}

/// One spawned task per job.
fn bench_task(c: &mut Criterion) {
    let mut group = c.benchmark_group("task");
    group.throughput(Throughput::Elements(TOTAL_JOBS as u64));

    group.bench_function(format!("jobs/{TOTAL_JOBS}"), |b| {
        let rt = Builder::new_multi_thread().enable_all().build().unwrap();

        b.to_async(&rt).iter_custom(|iters| async move {
            let start = Instant::now();

            for _ in 0..iters {
                let task = Task::new();
                let counter = Arc::new(AtomicUsize::new(0));
                for _ in 0..TOTAL_JOBS {
                    task.run(Tick(Arc::clone(&counter)));
                }
                task.shutdown(Duration::from_secs(5)).await.unwrap();
            }

            start.elapsed()
        });
    });

    group.finish();
}

fn benchmark_dispatcher_spawned(c: &mut Criterion) {
    bench_dispatcher(c, "dispatcher/spawned", DispatchMode::Spawned);
}

fn benchmark_dispatcher_inline(c: &mut Criterion) {
    bench_dispatcher(c, "dispatcher/inline", DispatchMode::Inline);
}

criterion_group!(
    benches,
    benchmark_dispatcher_spawned,
    benchmark_dispatcher_inline,
    bench_task_queue,
    bench_task,
);
criterion_main!(benches);
