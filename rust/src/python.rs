//! Python wrappers around the schedulers.
//!
//! A host hands in any object with `snapshot()`, `estimate(target)` and
//! `dispatch(request)` methods; [`PyEnvironment`] adapts it to the
//! collaborator traits. `dispatch` returns `None` or `True` to accept a
//! request and `False` to reject it.

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::config::{BatchConfig, LedgerConfig};
use crate::environment::{Dispatcher, EnvironmentError, Estimator, SystemClock, Topology};
use crate::models::{DispatchRequest, EnvironmentSnapshot, PassReport, Target, TargetEstimates};
use crate::scheduler::{BatchScheduler, RunSummary, SchedulerError, SimpleScheduler};

impl From<SchedulerError> for PyErr {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::InvalidConfig(_) => PyValueError::new_err(err.to_string()),
            SchedulerError::Environment(_) => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

/// A Python host object seen through the collaborator traits.
pub struct PyEnvironment {
    inner: PyObject,
}

impl PyEnvironment {
    pub fn new(inner: PyObject) -> Self {
        Self { inner }
    }
}

impl Topology for PyEnvironment {
    fn snapshot(&mut self) -> Result<EnvironmentSnapshot, EnvironmentError> {
        Python::with_gil(|py| {
            self.inner
                .bind(py)
                .call_method0("snapshot")?
                .extract::<EnvironmentSnapshot>()
        })
        .map_err(|e| EnvironmentError::Snapshot(e.to_string()))
    }
}

impl Estimator for PyEnvironment {
    fn estimate(&mut self, target: &Target) -> Result<TargetEstimates, EnvironmentError> {
        Python::with_gil(|py| {
            self.inner
                .bind(py)
                .call_method1("estimate", (target.clone(),))?
                .extract::<TargetEstimates>()
        })
        .map_err(|e| EnvironmentError::Estimate {
            target: target.id.clone(),
            reason: e.to_string(),
        })
    }
}

impl Dispatcher for PyEnvironment {
    fn dispatch(&mut self, request: &DispatchRequest) -> Result<(), EnvironmentError> {
        let failed = |reason: String| EnvironmentError::Dispatch {
            kind: request.kind.as_str().to_string(),
            target: request.target_id.clone(),
            worker: request.worker_id.clone(),
            reason,
        };
        let outcome = Python::with_gil(|py| {
            let result = self
                .inner
                .bind(py)
                .call_method1("dispatch", (request.clone(),))?;
            Ok::<DispatchOutcome, PyErr>(DispatchOutcome::from_return(&result))
        })
        .map_err(|e| failed(e.to_string()))?;

        match outcome {
            DispatchOutcome::Accepted => Ok(()),
            DispatchOutcome::Rejected => Err(failed("rejected by host".to_string())),
            DispatchOutcome::Unexpected(repr) => {
                Err(failed(format!("unexpected dispatch return value: {}", repr)))
            }
        }
    }
}

/// How a host's `dispatch` return value is read: `None` and `True` accept,
/// `False` rejects, anything else is a failure.
#[derive(Debug, PartialEq, Eq)]
enum DispatchOutcome {
    Accepted,
    Rejected,
    Unexpected(String),
}

impl DispatchOutcome {
    fn from_return(value: &Bound<'_, PyAny>) -> Self {
        if value.is_none() {
            return Self::Accepted;
        }
        match value.extract::<bool>() {
            Ok(true) => Self::Accepted,
            Ok(false) => Self::Rejected,
            Err(_) => Self::Unexpected(
                value
                    .repr()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|_| "<unprintable>".to_string()),
            ),
        }
    }
}

/// Batch scheduler driven by wall-clock time (Python wrapper).
#[pyclass(name = "Scheduler")]
pub struct PyScheduler {
    inner: BatchScheduler<SystemClock>,
}

#[pymethods]
impl PyScheduler {
    #[new]
    #[pyo3(signature = (config=None, ledger_config=None))]
    fn new(config: Option<BatchConfig>, ledger_config: Option<LedgerConfig>) -> PyResult<Self> {
        let inner = BatchScheduler::with_system_clock(
            config.unwrap_or_default(),
            ledger_config.unwrap_or_default(),
        )?;
        Ok(Self { inner })
    }

    /// Run a single pass against `env`.
    fn run_pass(&mut self, env: PyObject) -> PyResult<PassReport> {
        let mut env = PyEnvironment::new(env);
        Ok(self.inner.run_pass(&mut env)?)
    }

    /// Run passes until `max_passes` is reached, forever when None, or until
    /// a signal such as KeyboardInterrupt arrives. The GIL is released
    /// between host calls.
    #[pyo3(signature = (env, max_passes=None))]
    fn run(&mut self, py: Python<'_>, env: PyObject, max_passes: Option<u64>) -> PyResult<RunSummary> {
        let mut env = PyEnvironment::new(env);
        let mut interrupted: Option<PyErr> = None;
        let inner = &mut self.inner;

        let summary = py.allow_threads(|| {
            inner.run_until(&mut env, max_passes, |_| {
                match Python::with_gil(|py| py.check_signals()) {
                    Ok(()) => false,
                    Err(err) => {
                        interrupted = Some(err);
                        true
                    }
                }
            })
        });

        match interrupted {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    /// Targets with live batches, sorted by id.
    #[getter]
    fn batching_targets(&self) -> Vec<String> {
        self.inner.store().batching_targets()
    }

    #[getter]
    fn batch_count(&self) -> usize {
        self.inner.store().batch_count()
    }

    /// Threads held for phases not yet dispatched.
    #[getter]
    fn reserved_threads(&self) -> u32 {
        self.inner.store().reserved_threads()
    }

    fn __repr__(&self) -> String {
        format!(
            "Scheduler(batches={}, window_ms={}, gap_ms={})",
            self.inner.store().batch_count(),
            self.inner.config().batch_window_ms,
            self.inner.config().enforced_gap_ms
        )
    }
}

/// Single-target routine without batching (Python wrapper).
#[pyclass(name = "SimpleScheduler")]
pub struct PySimpleScheduler {
    inner: SimpleScheduler,
}

#[pymethods]
impl PySimpleScheduler {
    #[new]
    #[pyo3(signature = (config=None, ledger_config=None))]
    fn new(config: Option<BatchConfig>, ledger_config: Option<LedgerConfig>) -> PyResult<Self> {
        let inner = SimpleScheduler::new(
            config.unwrap_or_default(),
            ledger_config.unwrap_or_default(),
        )?;
        Ok(Self { inner })
    }

    fn run_pass(&mut self, env: PyObject) -> PyResult<PassReport> {
        let mut env = PyEnvironment::new(env);
        Ok(self.inner.run_pass(&mut env)?)
    }

    fn __repr__(&self) -> String {
        format!(
            "SimpleScheduler(threads_per_target={})",
            self.inner.config().threads_per_cycle_target
        )
    }
}
