//! Building blocks of the `workqueue-drill` binary.
//!
//! - [`config`] - CLI and environment configuration.
//! - [`jobs`] - the synthetic job submitted to every pool.
//! - [`runner`] - drives one drill against the selected pool.
//! - [`telemetry`] - logging, tracing and metrics setup.

pub mod config;
pub mod jobs;
pub mod runner;
pub mod telemetry;
