//! Core data types crossing the collaborator boundary.

use pyo3::prelude::*;

/// The three operations a target accepts.
#[pyclass(eq, eq_int)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Removes yield, raises security.
    Extract,
    /// Lowers security.
    Fortify,
    /// Raises yield, raises security.
    Grow,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Fortify => "fortify",
            Self::Grow => "grow",
        }
    }
}

/// Correlation tag attached to every operation this scheduler dispatches.
#[pyclass(eq, eq_int)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DispatchTag {
    /// Part of a batch.
    Batch,
    /// Remedial fortify/grow work outside any batch.
    Remedial,
    /// Work started by the single-target routine.
    Cycle,
}

impl DispatchTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Remedial => "remedial",
            Self::Cycle => "cycle",
        }
    }
}

/// A remote entity operations run against.
#[pyclass]
#[derive(Clone, Debug)]
pub struct Target {
    #[pyo3(get, set)]
    pub id: String,
    #[pyo3(get, set)]
    pub max_yield: f64,
    #[pyo3(get, set)]
    pub current_yield: f64,
    #[pyo3(get, set)]
    pub security: f64,
    #[pyo3(get, set)]
    pub min_security: f64,
    #[pyo3(get, set)]
    pub growth_rate: f64,
    #[pyo3(get, set)]
    pub required_skill: u32,
    #[pyo3(get, set)]
    pub has_admin: bool,
}

#[pymethods]
impl Target {
    #[new]
    #[pyo3(signature = (
        id,
        max_yield,
        current_yield,
        security,
        min_security,
        growth_rate=0.0,
        required_skill=0,
        has_admin=true
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: String,
        max_yield: f64,
        current_yield: f64,
        security: f64,
        min_security: f64,
        growth_rate: f64,
        required_skill: u32,
        has_admin: bool,
    ) -> Self {
        Self {
            id,
            max_yield,
            current_yield,
            security,
            min_security,
            growth_rate,
            required_skill,
            has_admin,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "Target(id={:?}, yield={}/{}, security={}/{})",
            self.id, self.current_yield, self.max_yield, self.security, self.min_security
        )
    }
}

impl Target {
    /// Current yield as a fraction of maximum (0 when the target has none).
    pub fn yield_ratio(&self) -> f64 {
        if self.max_yield <= 0.0 {
            return 0.0;
        }
        self.current_yield / self.max_yield
    }

    /// At minimum security and maximum yield.
    pub fn is_prepared(&self) -> bool {
        self.security == self.min_security && self.current_yield == self.max_yield
    }
}

/// A unit of thread capacity that executes dispatched operations.
#[pyclass]
#[derive(Clone, Debug)]
pub struct WorkerNode {
    #[pyo3(get, set)]
    pub id: String,
    #[pyo3(get, set)]
    pub max_memory: f64,
    #[pyo3(get, set)]
    pub used_memory: f64,
    #[pyo3(get, set)]
    pub has_admin: bool,
}

#[pymethods]
impl WorkerNode {
    #[new]
    #[pyo3(signature = (id, max_memory, used_memory=0.0, has_admin=true))]
    fn new(id: String, max_memory: f64, used_memory: f64, has_admin: bool) -> Self {
        Self {
            id,
            max_memory,
            used_memory,
            has_admin,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "WorkerNode(id={:?}, memory={}/{})",
            self.id, self.used_memory, self.max_memory
        )
    }
}

/// One entry of a worker's process table.
#[pyclass]
#[derive(Clone, Debug)]
pub struct RunningOperation {
    #[pyo3(get, set)]
    pub kind: OperationKind,
    #[pyo3(get, set)]
    pub target_id: String,
    #[pyo3(get, set)]
    pub worker_id: String,
    #[pyo3(get, set)]
    pub threads: u32,
    /// None for work this scheduler did not start
    #[pyo3(get, set)]
    pub tag: Option<DispatchTag>,
}

#[pymethods]
impl RunningOperation {
    #[new]
    #[pyo3(signature = (kind, target_id, worker_id, threads, tag=None))]
    fn new(
        kind: OperationKind,
        target_id: String,
        worker_id: String,
        threads: u32,
        tag: Option<DispatchTag>,
    ) -> Self {
        Self {
            kind,
            target_id,
            worker_id,
            threads,
            tag,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "RunningOperation(kind={}, target={:?}, worker={:?}, threads={})",
            self.kind.as_str(),
            self.target_id,
            self.worker_id,
            self.threads
        )
    }
}

/// Everything the topology collaborator reports in one call.
#[pyclass]
#[derive(Clone, Debug, Default)]
pub struct EnvironmentSnapshot {
    #[pyo3(get, set)]
    pub targets: Vec<Target>,
    #[pyo3(get, set)]
    pub workers: Vec<WorkerNode>,
    #[pyo3(get, set)]
    pub operations: Vec<RunningOperation>,
    /// Skill level of the actor, compared against each target's skill gate
    #[pyo3(get, set)]
    pub skill: u32,
}

#[pymethods]
impl EnvironmentSnapshot {
    #[new]
    #[pyo3(signature = (targets, workers, operations=None, skill=0))]
    fn new(
        targets: Vec<Target>,
        workers: Vec<WorkerNode>,
        operations: Option<Vec<RunningOperation>>,
        skill: u32,
    ) -> Self {
        Self {
            targets,
            workers,
            operations: operations.unwrap_or_default(),
            skill,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "EnvironmentSnapshot(targets={}, workers={}, operations={}, skill={})",
            self.targets.len(),
            self.workers.len(),
            self.operations.len(),
            self.skill
        )
    }
}

impl EnvironmentSnapshot {
    pub fn target(&self, id: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.id == id)
    }

    /// Whether any running operation acts on the target.
    pub fn is_targeted(&self, target_id: &str) -> bool {
        self.operations.iter().any(|op| op.target_id == target_id)
    }
}

/// Point estimates for one target, as reported by the estimation collaborator.
#[pyclass]
#[derive(Clone, Debug)]
pub struct TargetEstimates {
    /// Duration of a fortify operation (ms)
    #[pyo3(get, set)]
    pub fortify_ms: f64,
    /// Duration of a grow operation (ms)
    #[pyo3(get, set)]
    pub grow_ms: f64,
    /// Duration of an extract operation (ms)
    #[pyo3(get, set)]
    pub extract_ms: f64,
    /// Fraction of current yield one extract thread removes
    #[pyo3(get, set)]
    pub extract_fraction_per_thread: f64,
    /// Yield multiplier one grow thread applies
    #[pyo3(get, set)]
    pub grow_factor_per_thread: f64,
}

#[pymethods]
impl TargetEstimates {
    #[new]
    fn new(
        fortify_ms: f64,
        grow_ms: f64,
        extract_ms: f64,
        extract_fraction_per_thread: f64,
        grow_factor_per_thread: f64,
    ) -> Self {
        Self {
            fortify_ms,
            grow_ms,
            extract_ms,
            extract_fraction_per_thread,
            grow_factor_per_thread,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "TargetEstimates(fortify_ms={}, grow_ms={}, extract_ms={})",
            self.fortify_ms, self.grow_ms, self.extract_ms
        )
    }
}

impl TargetEstimates {
    pub fn duration_ms(&self, kind: OperationKind) -> f64 {
        match kind {
            OperationKind::Extract => self.extract_ms,
            OperationKind::Fortify => self.fortify_ms,
            OperationKind::Grow => self.grow_ms,
        }
    }
}

/// A single operation handed to the dispatch collaborator.
#[pyclass]
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchRequest {
    #[pyo3(get)]
    pub kind: OperationKind,
    #[pyo3(get)]
    pub target_id: String,
    #[pyo3(get)]
    pub threads: u32,
    #[pyo3(get)]
    pub worker_id: String,
    #[pyo3(get)]
    pub tag: DispatchTag,
    /// Unique per dispatch so identical operations never collide
    #[pyo3(get)]
    pub correlation_id: String,
}

#[pymethods]
impl DispatchRequest {
    fn __repr__(&self) -> String {
        format!(
            "DispatchRequest(kind={}, target={:?}, threads={}, worker={:?}, tag={}, id={})",
            self.kind.as_str(),
            self.target_id,
            self.threads,
            self.worker_id,
            self.tag.as_str(),
            self.correlation_id
        )
    }
}

/// What one scheduling pass did.
#[pyclass]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Remedial operations dispatched
    #[pyo3(get)]
    pub remedial_dispatches: usize,
    /// Pending batch phases dispatched by maintenance
    #[pyo3(get)]
    pub phases_dispatched: usize,
    /// New batches created (anchor dispatched)
    #[pyo3(get)]
    pub batches_created: usize,
    /// Batches retired at the start of the pass
    #[pyo3(get)]
    pub batches_retired: usize,
    /// Operations started by the single-target routine
    #[pyo3(get)]
    pub cycle_dispatches: usize,
    /// Dispatch calls the collaborator rejected
    #[pyo3(get)]
    pub dispatch_failures: usize,
}

impl PassReport {
    /// Fold another pass's counts into this one.
    pub fn merge(&mut self, other: &PassReport) {
        self.remedial_dispatches += other.remedial_dispatches;
        self.phases_dispatched += other.phases_dispatched;
        self.batches_created += other.batches_created;
        self.batches_retired += other.batches_retired;
        self.cycle_dispatches += other.cycle_dispatches;
        self.dispatch_failures += other.dispatch_failures;
    }
}

#[pymethods]
impl PassReport {
    fn __repr__(&self) -> String {
        format!(
            "PassReport(remedial={}, phases={}, created={}, retired={}, cycle={}, failures={})",
            self.remedial_dispatches,
            self.phases_dispatched,
            self.batches_created,
            self.batches_retired,
            self.cycle_dispatches,
            self.dispatch_failures
        )
    }
}
