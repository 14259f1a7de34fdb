#![doc = include_str!("../README.md")]

mod config;
mod dispatcher;
mod error;
pub mod job;
mod registry;
mod state;
mod task;
mod task_queue;
mod worker;


pub use crate::config::*;
pub use crate::dispatcher::*;
pub use crate::error::*;
pub use crate::job::{BoxedJob, DynJob, Job, JobExt};
pub use crate::registry::*;
pub use crate::state::PoolState;
pub use crate::task::Task;
pub use crate::task_queue::*;
pub use crate::worker::*;
