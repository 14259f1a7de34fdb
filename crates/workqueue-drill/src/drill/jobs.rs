use super::telemetry;
use core::time::Duration;
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::task::task_tracker::TaskTrackerToken;
use workqueue::Job;

/// A job that does nothing but take `duration`.
///
/// It holds a token of the drill's own tracker, so the drill can tell when
/// every submitted job has either finished or been dropped by a pool.
pub struct SyntheticJob {
    id: usize,
    duration: Duration,
    blocking: bool,
    completed: Arc<AtomicUsize>,
    _pending: TaskTrackerToken,
}

impl SyntheticJob {
    pub const fn new(
        id: usize,
        duration: Duration,
        blocking: bool,
        completed: Arc<AtomicUsize>,
        pending: TaskTrackerToken,
    ) -> Self {
        Self {
            id,
            duration,
            blocking,
            completed,
            _pending: pending,
        }
    }
}

impl Job for SyntheticJob {
    async fn process(self) {
        telemetry::increment_jobs_inflight();
        let started = Instant::now();

        if self.blocking {
            let duration = self.duration;
            workqueue::job::blocking(move || std::thread::sleep(duration))
                .process()
                .await;
        } else {
            tokio::time::sleep(self.duration).await;
        }

        self.completed.fetch_add(1, Ordering::Relaxed);

        let elapsed = started.elapsed();
        telemetry::decrement_jobs_inflight();
        telemetry::increment_jobs_completed();
        telemetry::record_job_duration(elapsed.as_secs_f64() * 1_000.0);

        #[cfg(feature = "tracing")]
        tracing::debug!("Job {} finished in {:?}", self.id, elapsed);
        #[cfg(not(feature = "tracing"))]
        let _ = self.id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::task::TaskTracker;

    #[tokio::test(start_paused = true)]
    async fn job_counts_itself_and_releases_its_token() {
        let tracker = TaskTracker::new();
        let completed = Arc::new(AtomicUsize::new(0));
        let job = SyntheticJob::new(
            0,
            Duration::from_millis(20),
            false,
            Arc::clone(&completed),
            tracker.token(),
        );
        assert_eq!(tracker.len(), 1);

        let started = Instant::now();
        job.process().await;

        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(completed.load(Ordering::Relaxed), 1);
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn blocking_job_sleeps_on_the_blocking_pool() {
        let tracker = TaskTracker::new();
        let completed = Arc::new(AtomicUsize::new(0));
        SyntheticJob::new(1, Duration::from_millis(5), true, Arc::clone(&completed), tracker.token())
            .process()
            .await;
        assert_eq!(completed.load(Ordering::Relaxed), 1);
    }
}
