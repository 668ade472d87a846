//! Tapeline - scheduled incremental backup of a distributed filesystem to tape
//!
//! This library implements the job pipeline and tape lifecycle controller for
//! backing up HDFS directory trees onto a robotic tape library. Data lands on
//! the cartridges as a sequence of single-file tar archives separated by tape
//! file marks, and a PostgreSQL catalog records which file was written to
//! which tape at which file-mark ordinal so retrieval never requires scanning
//! the library.
//!
//! # High-Level API
//!
//! The [`orchestrator`] module provides the long-lived entry point:
//!
//! ```ignore
//! use tapeline::orchestrator::Orchestrator;
//!
//! let orchestrator = Orchestrator::new(pipeline_a, pipeline_b, schedules, roots, cancel);
//!
//! // Runs the paired pipelines on their schedules until SIGINT/SIGTERM.
//! let outcome = orchestrator.run().await;
//! ```
//!
//! # Architecture
//!
//! ```text
//! Orchestrator ─┬─ Pipeline A ─┬─ Producer (walk → Job rows)
//!               │              └─ Consumer (Job rows → tape + File rows)
//!               └─ Pipeline B ─┬─ Producer
//!                              └─ Consumer
//!                       shared robotic arm mutex
//! ```

pub mod catalog;
pub mod changer;
pub mod config;
pub mod logging;
pub mod orchestrator;
pub mod pair;
pub mod pipeline;
pub mod source;
pub mod tape;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;

/// Version of the tapeline library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
