use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use workqueue::DispatchMode;

/// Which pool a drill exercises.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Idle-worker dispatcher fed through a channel.
    Dispatcher,
    /// Bounded queue with persistent consumers.
    TaskQueue,
    /// One spawned task per job.
    Task,
}

/// How the dispatcher hands jobs to workers.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// One waiting task per job.
    Spawned,
    /// Wait for an idle worker inside the dispatch loop.
    Inline,
}

impl From<Dispatch> for DispatchMode {
    fn from(value: Dispatch) -> Self {
        match value {
            Dispatch::Spawned => Self::Spawned,
            Dispatch::Inline => Self::Inline,
        }
    }
}

/// Command-line arguments for the `workqueue-drill` binary.
///
/// Every flag can also be set through the environment (or a `.env` file).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "workqueue-drill",
    version,
    about = "Push synthetic jobs through a workqueue pool and report the shutdown"
)]
pub struct CliArgs {
    /// Pool to drill.
    ///
    /// Environment variable: `DRILL_MODE`
    #[arg(long, env = "DRILL_MODE", value_enum, default_value_t = Mode::Dispatcher)]
    pub mode: Mode,

    /// Dispatcher workers, or task-queue consumers.
    ///
    /// Environment variable: `DRILL_WORKERS`
    #[arg(long, env = "DRILL_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Task-queue admission capacity. For the dispatcher this is the capacity
    /// of the inbound channel. Defaults to the worker count.
    ///
    /// Environment variable: `DRILL_QUEUE_CAPACITY`
    #[arg(long, env = "DRILL_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Dispatcher strategy while waiting for an idle worker.
    ///
    /// Environment variable: `DRILL_DISPATCH_MODE`
    #[arg(long, env = "DRILL_DISPATCH_MODE", value_enum, default_value_t = Dispatch::Spawned)]
    pub dispatch_mode: Dispatch,

    /// Number of synthetic jobs to submit.
    ///
    /// Environment variable: `DRILL_JOBS`
    #[arg(long, env = "DRILL_JOBS", default_value_t = 64)]
    pub jobs: usize,

    /// How long each synthetic job takes, in milliseconds.
    ///
    /// Environment variable: `DRILL_JOB_MILLIS`
    #[arg(long, env = "DRILL_JOB_MILLIS", default_value_t = 50)]
    pub job_millis: u64,

    /// Sleep on the blocking thread pool instead of the async timer.
    ///
    /// Environment variable: `DRILL_BLOCKING`
    #[arg(long, env = "DRILL_BLOCKING", default_value_t = false)]
    pub blocking: bool,

    /// How long to wait for outstanding jobs once submission ends.
    ///
    /// Environment variable: `DRILL_SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "DRILL_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DrillConfig {
    pub mode: Mode,
    pub workers: usize,
    pub queue_capacity: usize,
    pub dispatch_mode: DispatchMode,
    pub jobs: usize,
    pub job_duration: Duration,
    pub blocking: bool,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for DrillConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.workers == 0 {
            bail!("DRILL_WORKERS must be greater than 0");
        }

        let queue_capacity = args.queue_capacity.unwrap_or(args.workers);
        if queue_capacity == 0 {
            bail!("DRILL_QUEUE_CAPACITY must be greater than 0");
        }

        if args.jobs == 0 {
            bail!("DRILL_JOBS must be greater than 0");
        }

        Ok(Self {
            mode: args.mode,
            workers: args.workers,
            queue_capacity,
            dispatch_mode: args.dispatch_mode.into(),
            jobs: args.jobs,
            job_duration: Duration::from_millis(args.job_millis),
            blocking: args.blocking,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        })
    }
}
