//! Rust implementation of the Salvo batch scheduling engine.
//!
//! Schedules timed, multi-phase batches of extract/fortify/grow operations
//! against many targets under a shared thread budget.

// Allow clippy warning triggered by PyO3 macro expansion
#![allow(clippy::useless_conversion)]

use pyo3::prelude::*;

pub mod batch;
mod config;
pub mod environment;
pub mod ledger;
pub mod logging;
mod models;
mod python;
pub mod scheduler;
pub mod selector;
pub mod thread_math;

pub use batch::{Batch, BatchStore, BatchWindow, DuePhase, Phase, PhaseKind, TargetBatches};
pub use config::{BatchConfig, LedgerConfig};
pub use environment::{
    Clock, Dispatcher, Environment, EnvironmentError, Estimator, ManualClock, SystemClock, Topology,
};
pub use ledger::{NodeThreads, ThreadLedger};
pub use models::{
    DispatchRequest, DispatchTag, EnvironmentSnapshot, OperationKind, PassReport, RunningOperation,
    Target, TargetEstimates, WorkerNode,
};
pub use python::{PyEnvironment, PyScheduler, PySimpleScheduler};
pub use scheduler::{BatchScheduler, RunSummary, SchedulerError, SimpleScheduler};
pub use thread_math::{Allocation, BatchThreadCounts, CycleThreadCounts, GrowAllocation};

/// Fortify threads needed to lower security by `amount`.
///
/// # Returns
/// * `(threads, exact)`; `exact` is False when capped at `max_threads`
#[pyfunction]
#[pyo3(name = "fortify_threads", signature = (amount, max_threads=None, config=None))]
fn py_fortify_threads(
    amount: f64,
    max_threads: Option<u32>,
    config: Option<BatchConfig>,
) -> (u32, bool) {
    let config = config.unwrap_or_default();
    let allocation = thread_math::fortify_threads(amount, max_threads, &config);
    (allocation.threads().unwrap_or(0), allocation.is_exact())
}

/// Grow and covering fortify threads to restore a target's yield.
///
/// # Returns
/// * `(grow, fortify, exact)`; `exact` is False when the split was degraded
///   to fit `max_threads`
#[pyfunction]
#[pyo3(name = "grow_threads", signature = (max_yield, current_yield, max_threads, grow_factor_per_thread, config=None))]
fn py_grow_threads(
    max_yield: f64,
    current_yield: f64,
    max_threads: u32,
    grow_factor_per_thread: f64,
    config: Option<BatchConfig>,
) -> (u32, u32, bool) {
    let config = config.unwrap_or_default();
    let allocation = thread_math::grow_threads(
        max_yield,
        current_yield,
        max_threads,
        grow_factor_per_thread,
        &config,
    );
    let exact = allocation.is_exact();
    let counts = allocation.threads().unwrap_or_default();
    (counts.grow, counts.fortify, exact)
}

/// Thread counts for a full four-phase batch.
///
/// # Returns
/// * `(hack, hack_weaken, grow, grow_weaken)`, or None when the batch does
///   not fit `max_threads`
#[pyfunction]
#[pyo3(name = "extraction_threads", signature = (hack_percent, max_threads, grow_factor_per_thread, config=None))]
fn py_extraction_threads(
    hack_percent: f64,
    max_threads: u32,
    grow_factor_per_thread: f64,
    config: Option<BatchConfig>,
) -> Option<(u32, u32, u32, u32)> {
    let config = config.unwrap_or_default();
    thread_math::extraction_threads(hack_percent, max_threads, grow_factor_per_thread, &config)
        .threads()
        .map(|c| (c.hack, c.hack_weaken, c.grow, c.grow_weaken))
}

/// Install a stderr log subscriber filtered to `verbosity`.
///
/// # Returns
/// * False if a subscriber was already installed
#[pyfunction]
#[pyo3(name = "init_logging", signature = (verbosity=1))]
fn py_init_logging(verbosity: u8) -> bool {
    logging::init_logging(verbosity)
}

/// The salvo.rust Python module.
#[pymodule]
fn rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Core data types
    m.add_class::<OperationKind>()?;
    m.add_class::<DispatchTag>()?;
    m.add_class::<Target>()?;
    m.add_class::<WorkerNode>()?;
    m.add_class::<RunningOperation>()?;
    m.add_class::<EnvironmentSnapshot>()?;
    m.add_class::<TargetEstimates>()?;
    m.add_class::<DispatchRequest>()?;
    m.add_class::<PassReport>()?;
    m.add_class::<RunSummary>()?;

    // Config types
    m.add_class::<BatchConfig>()?;
    m.add_class::<LedgerConfig>()?;

    // Schedulers
    m.add_class::<PyScheduler>()?;
    m.add_class::<PySimpleScheduler>()?;

    // Thread math and helpers
    m.add_function(wrap_pyfunction!(py_fortify_threads, m)?)?;
    m.add_function(wrap_pyfunction!(py_grow_threads, m)?)?;
    m.add_function(wrap_pyfunction!(py_extraction_threads, m)?)?;
    m.add_function(wrap_pyfunction!(py_init_logging, m)?)?;

    Ok(())
}
