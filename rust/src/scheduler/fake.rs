//! In-memory environment for scheduler tests.

use chrono::{DateTime, TimeZone, Utc};

use crate::environment::{Dispatcher, EnvironmentError, Estimator, Topology};
use crate::models::{
    DispatchRequest, EnvironmentSnapshot, OperationKind, RunningOperation, Target,
    TargetEstimates, WorkerNode,
};

pub const THREAD_COST: f64 = 1.75;

/// Serves a mutable snapshot and applies every successful dispatch to it, so
/// later snapshots see the memory and process table the dispatch consumed.
pub struct FakeEnv {
    pub snapshot: EnvironmentSnapshot,
    pub estimates: TargetEstimates,
    pub dispatched: Vec<DispatchRequest>,
    pub failing_workers: Vec<String>,
    pub snapshot_failures: usize,
    pub estimate_calls: usize,
}

impl FakeEnv {
    pub fn new(targets: Vec<Target>, workers: Vec<WorkerNode>) -> Self {
        Self {
            snapshot: EnvironmentSnapshot {
                targets,
                workers,
                operations: vec![],
                skill: 100,
            },
            estimates: make_estimates(),
            dispatched: vec![],
            failing_workers: vec![],
            snapshot_failures: 0,
            estimate_calls: 0,
        }
    }

    pub fn target_mut(&mut self, id: &str) -> &mut Target {
        self.snapshot
            .targets
            .iter_mut()
            .find(|t| t.id == id)
            .expect("unknown target")
    }

    /// (kind, threads) of every accepted dispatch, in order.
    pub fn calls(&self) -> Vec<(OperationKind, u32)> {
        self.dispatched.iter().map(|r| (r.kind, r.threads)).collect()
    }
}

impl Topology for FakeEnv {
    fn snapshot(&mut self) -> Result<EnvironmentSnapshot, EnvironmentError> {
        if self.snapshot_failures > 0 {
            self.snapshot_failures -= 1;
            return Err(EnvironmentError::Snapshot("topology unreachable".to_string()));
        }
        Ok(self.snapshot.clone())
    }
}

impl Estimator for FakeEnv {
    fn estimate(&mut self, _target: &Target) -> Result<TargetEstimates, EnvironmentError> {
        self.estimate_calls += 1;
        Ok(self.estimates.clone())
    }
}

impl Dispatcher for FakeEnv {
    fn dispatch(&mut self, request: &DispatchRequest) -> Result<(), EnvironmentError> {
        if self.failing_workers.contains(&request.worker_id) {
            return Err(EnvironmentError::Dispatch {
                kind: request.kind.as_str().to_string(),
                target: request.target_id.clone(),
                worker: request.worker_id.clone(),
                reason: "not enough memory".to_string(),
            });
        }
        if let Some(worker) = self
            .snapshot
            .workers
            .iter_mut()
            .find(|w| w.id == request.worker_id)
        {
            worker.used_memory += request.threads as f64 * THREAD_COST;
        }
        self.snapshot.operations.push(RunningOperation {
            kind: request.kind,
            target_id: request.target_id.clone(),
            worker_id: request.worker_id.clone(),
            threads: request.threads,
            tag: Some(request.tag),
        });
        self.dispatched.push(request.clone());
        Ok(())
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

/// A target at minimum security and maximum yield.
pub fn make_target(id: &str, max_yield: f64) -> Target {
    Target {
        id: id.to_string(),
        max_yield,
        current_yield: max_yield,
        security: 1.0,
        min_security: 1.0,
        growth_rate: 20.0,
        required_skill: 10,
        has_admin: true,
    }
}

pub fn make_worker(id: &str, threads: u32) -> WorkerNode {
    WorkerNode {
        id: id.to_string(),
        max_memory: threads as f64 * THREAD_COST,
        used_memory: 0.0,
        has_admin: true,
    }
}

/// Fortify 10s, grow 8s, extract 2.5s; a full batch is 50/2/75/6 threads.
pub fn make_estimates() -> TargetEstimates {
    TargetEstimates {
        fortify_ms: 10_000.0,
        grow_ms: 8_000.0,
        extract_ms: 2_500.0,
        extract_fraction_per_thread: 0.01,
        grow_factor_per_thread: 1.01,
    }
}
