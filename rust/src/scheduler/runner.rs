//! Fixed-interval pass loop.

use chrono::Duration;
use pyo3::prelude::*;

use crate::environment::{Clock, Environment};
use crate::models::PassReport;

use super::core::BatchScheduler;

/// Outcome of a run of consecutive passes.
#[pyclass]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    #[pyo3(get)]
    pub passes: u64,
    /// Passes that returned an error and were skipped
    #[pyo3(get)]
    pub failed_passes: u64,
    /// Counts summed over every successful pass
    #[pyo3(get)]
    pub totals: PassReport,
}

#[pymethods]
impl RunSummary {
    fn __repr__(&self) -> String {
        format!(
            "RunSummary(passes={}, failed_passes={}, batches_created={})",
            self.passes, self.failed_passes, self.totals.batches_created
        )
    }
}

impl<C: Clock> BatchScheduler<C> {
    /// Run passes back to back, sleeping the configured interval between
    /// them. A failed pass is logged and skipped; the loop only ends after
    /// `max_passes`, or never when that is None.
    pub fn run<E: Environment + ?Sized>(&mut self, env: &mut E, max_passes: Option<u64>) -> RunSummary {
        self.run_until(env, max_passes, |_| false)
    }

    /// Like [`run`](Self::run), but also stops as soon as `should_stop`
    /// returns true after a pass.
    pub fn run_until<E, F>(&mut self, env: &mut E, max_passes: Option<u64>, mut should_stop: F) -> RunSummary
    where
        E: Environment + ?Sized,
        F: FnMut(&RunSummary) -> bool,
    {
        let interval = Duration::milliseconds(self.config().pass_interval_ms);
        let mut summary = RunSummary::default();

        while max_passes.map_or(true, |max| summary.passes < max) {
            match self.run_pass(env) {
                Ok(report) => summary.totals.merge(&report),
                Err(err) => {
                    summary.failed_passes += 1;
                    tracing::error!(pass = summary.passes, error = %err, "Scheduling pass failed");
                }
            }
            summary.passes += 1;

            if should_stop(&summary) || max_passes.is_some_and(|max| summary.passes >= max) {
                break;
            }
            self.clock().sleep(interval);
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchConfig, LedgerConfig};
    use crate::environment::ManualClock;
    use crate::scheduler::fake::{make_target, make_worker, t0, FakeEnv};

    fn make_scheduler() -> BatchScheduler<ManualClock> {
        BatchScheduler::new(
            BatchConfig::default(),
            LedgerConfig::default(),
            ManualClock::new(t0()),
        )
        .unwrap()
    }

    fn make_env() -> FakeEnv {
        FakeEnv::new(vec![make_target("t", 1_000_000.0)], vec![make_worker("w1", 1000)])
    }

    #[test]
    fn test_run_sleeps_between_passes() {
        let mut scheduler = make_scheduler();
        let mut env = make_env();

        let summary = scheduler.run(&mut env, Some(3));
        assert_eq!(summary.passes, 3);
        assert_eq!(summary.failed_passes, 0);
        assert_eq!(scheduler.clock().now(), t0() + Duration::milliseconds(1_000));
    }

    #[test]
    fn test_failed_pass_does_not_stop_the_loop() {
        let mut scheduler = make_scheduler();
        let mut env = make_env();
        env.snapshot_failures = 1;

        let summary = scheduler.run(&mut env, Some(2));
        assert_eq!(summary.passes, 2);
        assert_eq!(summary.failed_passes, 1);
        // The second pass still created the batch
        assert_eq!(summary.totals.batches_created, 1);
    }

    #[test]
    fn test_run_until_stops_early() {
        let mut scheduler = make_scheduler();
        let mut env = make_env();

        let summary = scheduler.run_until(&mut env, None, |s| s.totals.batches_created > 0);
        assert_eq!(summary.passes, 1);
        assert_eq!(scheduler.clock().now(), t0());
    }

    #[test]
    fn test_loop_walks_batch_through_phases() {
        let mut scheduler = make_scheduler();
        let mut env = make_env();

        // 500ms passes across the first 7.5s: every phase of the first
        // batch finds its window
        let summary = scheduler.run(&mut env, Some(16));
        assert_eq!(summary.failed_passes, 0);
        let first = &scheduler.store().get("t").unwrap().batches()[0];
        assert!(!first.is_active());
        assert!(summary.totals.phases_dispatched >= 3);
    }
}
