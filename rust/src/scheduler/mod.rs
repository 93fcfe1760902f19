//! Scheduler module: the batch scheduler, its pass loop, and the simpler
//! single-target routine.
//!
//! [`BatchScheduler`] owns the batch store and drives three sub-passes per
//! invocation (remedial, maintenance, creation). [`SimpleScheduler`] keeps no
//! state and works one target at a time.

mod core;
#[cfg(test)]
mod fake;
mod runner;
mod simple;

pub use core::{BatchScheduler, SchedulerError};
pub use runner::RunSummary;
pub use simple::SimpleScheduler;
