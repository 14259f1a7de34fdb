//! The [`Job`] capability contract and its adapters.
//!
//! A job is an opaque unit of work with a single operation: [`Job::process`].
//! The pools in this crate call it exactly once per delivered job and never
//! observe an outcome. Anything a job wants to report (results, errors,
//! retries) travels through the job's own side channels.
//!
//! Absent jobs are expressed as `Option<J>::None`. Every submission surface
//! accepts `impl Into<Option<J>>`, so callers can pass either a job or `None`,
//! and `None` is skipped silently.

use core::{future::Future, panic::AssertUnwindSafe};
use futures::{FutureExt, future::BoxFuture};

/// A unit of work that can be processed.
///
/// `process` consumes the job, so a job runs at most once. The returned future
/// is driven to completion on the pool task that received the job.
///
/// # Example
///
/// ```
/// use workqueue::Job;
///
/// struct SendWelcomeMail {
///     to: String,
/// }
///
/// impl Job for SendWelcomeMail {
///     async fn process(self) {
///         // deliver the mail; failures are handled here, not by the pool
///         let _ = self.to;
///     }
/// }
/// ```
pub trait Job: Send + 'static {
    /// Executes the job.
    fn process(self) -> impl Future<Output = ()> + Send + 'static;
}

/// Object-safe form of [`Job`], used to store heterogeneous jobs behind a
/// single pointer type.
///
/// Implemented for every [`Job`]; there is no need to implement it directly.
pub trait DynJob: Send + 'static {
    /// Executes the boxed job.
    fn process_boxed(self: Box<Self>) -> BoxFuture<'static, ()>;
}

impl<J: Job> DynJob for J {
    fn process_boxed(self: Box<Self>) -> BoxFuture<'static, ()> {
        (*self).process().boxed()
    }
}

/// A type-erased job. Lets one pool run jobs from unrelated collaborators.
pub type BoxedJob = Box<dyn DynJob>;

impl Job for BoxedJob {
    fn process(self) -> impl Future<Output = ()> + Send + 'static {
        self.process_boxed()
    }
}

/// Convenience conversions for any [`Job`].
pub trait JobExt: Job + Sized {
    /// Erases the concrete job type.
    fn boxed(self) -> BoxedJob {
        Box::new(self)
    }
}

impl<J: Job> JobExt for J {}

/// A [`Job`] backed by an async closure. See [`from_fn`].
pub struct FnJob<F>(F);

/// Wraps a closure returning a future into a [`Job`].
///
/// ```
/// let job = workqueue::job::from_fn(|| async {
///     // publish a message, write a row, ...
/// });
/// # let _ = job;
/// ```
pub fn from_fn<F, Fut>(f: F) -> FnJob<F>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    FnJob(f)
}

impl<F, Fut> Job for FnJob<F>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn process(self) -> impl Future<Output = ()> + Send + 'static {
        (self.0)()
    }
}

/// A [`Job`] that runs a synchronous closure on tokio's blocking pool. See
/// [`blocking`].
pub struct BlockingJob<F>(F);

/// Wraps a synchronous closure into a [`Job`].
///
/// The closure runs on [`tokio::task::spawn_blocking`], so blocking I/O or
/// CPU-heavy work does not stall the async workers. The pool slot stays busy
/// until the closure returns. A panic in the closure is re-raised on the pool
/// task, where it is contained like any other job panic.
pub fn blocking<F>(f: F) -> BlockingJob<F>
where
    F: FnOnce() + Send + 'static,
{
    BlockingJob(f)
}

impl<F> Job for BlockingJob<F>
where
    F: FnOnce() + Send + 'static,
{
    fn process(self) -> impl Future<Output = ()> + Send + 'static {
        let f = self.0;
        async move {
            if let Err(err) = tokio::task::spawn_blocking(f).await {
                if err.is_panic() {
                    std::panic::resume_unwind(err.into_panic());
                }
            }
        }
    }
}

/// Runs a job to completion, containing any panic it raises.
///
/// Pools call this instead of awaiting [`Job::process`] directly so that a
/// faulty job cannot take down a persistent worker or leak its outstanding
/// slot. The panic is logged (with the `tracing` feature) and dropped.
pub(crate) async fn run_contained<J: Job>(job: J) {
    let outcome = AssertUnwindSafe(async move { job.process().await })
        .catch_unwind()
        .await;

    if let Err(_payload) = outcome {
        #[cfg(feature = "tracing")]
        tracing::error!("Job panicked: {}", panic_message(_payload.as_ref()));
    }
}

#[cfg(feature = "tracing")]
fn panic_message(payload: &(dyn core::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    struct Count(Arc<AtomicUsize>);

    impl Job for Count {
        async fn process(self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn boxed_jobs_of_different_types_share_one_type() {
        let hits = Arc::new(AtomicUsize::new(0));
        let closure_hits = Arc::clone(&hits);

        let jobs: Vec<BoxedJob> = vec![
            Count(Arc::clone(&hits)).boxed(),
            from_fn(move || async move {
                closure_hits.fetch_add(10, Ordering::SeqCst);
            })
            .boxed(),
        ];

        for job in jobs {
            job.process().await;
        }

        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_job_runs_off_the_async_workers() {
        let hits = Arc::new(AtomicUsize::new(0));
        let job_hits = Arc::clone(&hits);

        blocking(move || {
            std::thread::sleep(std::time::Duration::from_millis(5));
            job_hits.fetch_add(1, Ordering::SeqCst);
        })
        .process()
        .await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_contained_swallows_panics() {
        run_contained(from_fn(|| async { panic!("mail server unreachable") })).await;
        run_contained(blocking(|| panic!("disk full"))).await;
    }

    #[tokio::test]
    async fn run_contained_runs_the_job() {
        let hits = Arc::new(AtomicUsize::new(0));
        run_contained(Count(Arc::clone(&hits))).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
