//! Core batch scheduler implementation.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::batch::{Batch, BatchStore, BatchWindow};
use crate::config::{BatchConfig, LedgerConfig};
use crate::environment::{millis, Clock, Environment, EnvironmentError, SystemClock};
use crate::ledger::ThreadLedger;
use crate::models::{
    DispatchRequest, DispatchTag, EnvironmentSnapshot, OperationKind, PassReport, Target,
    TargetEstimates,
};
use crate::selector::{
    batch_candidates, is_eligible, needs_remedial, rank_targets, remedial_candidates,
};
use crate::thread_math::{
    extraction_threads, fortify_threads, grow_threads, ideal_batch_threads, Allocation,
};
use crate::{log_changes, log_checks, log_debug};

/// Errors that can occur during scheduling.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Source of correlation ids; every dispatch gets a fresh one.
#[derive(Clone, Debug, Default)]
pub(super) struct CorrelationIds {
    next: u64,
}

impl CorrelationIds {
    pub(super) fn next(&mut self, tag: DispatchTag) -> String {
        self.next += 1;
        format!("{}-{}", tag.as_str(), self.next)
    }
}

/// One operation to start, before it is split over worker nodes.
#[derive(Clone, Copy, Debug)]
pub(super) struct OperationPlan<'a> {
    pub kind: OperationKind,
    pub target_id: &'a str,
    pub threads: u32,
    pub tag: DispatchTag,
}

/// Spread a planned operation over free worker capacity, one request per node.
///
/// Returns the threads actually started. A rejected chunk hands its threads
/// back to the ledger and is counted as a failure; the other chunks stand.
pub(super) fn dispatch_spread<E: Environment + ?Sized>(
    env: &mut E,
    ledger: &mut ThreadLedger,
    ids: &mut CorrelationIds,
    report: &mut PassReport,
    plan: OperationPlan<'_>,
    verbosity: u8,
) -> u32 {
    if plan.threads == 0 {
        return 0;
    }

    let placements = ledger.allocate(plan.threads);
    if placements.is_empty() {
        log_checks!(
            verbosity,
            "  No free threads for {} against {}",
            plan.kind.as_str(),
            plan.target_id
        );
        return 0;
    }

    let mut started = 0;
    for (worker_id, threads) in placements {
        let request = DispatchRequest {
            kind: plan.kind,
            target_id: plan.target_id.to_string(),
            threads,
            worker_id: worker_id.clone(),
            tag: plan.tag,
            correlation_id: ids.next(plan.tag),
        };
        match env.dispatch(&request) {
            Ok(()) => {
                started += threads;
                log_debug!(
                    verbosity,
                    "    {} x{} against {} on {} ({})",
                    plan.kind.as_str(),
                    threads,
                    plan.target_id,
                    worker_id,
                    request.correlation_id
                );
            }
            Err(err) => {
                ledger.release(&worker_id, threads);
                report.dispatch_failures += 1;
                tracing::warn!(
                    target_id = plan.target_id,
                    worker = %worker_id,
                    threads,
                    error = %err,
                    "Dispatch failed"
                );
            }
        }
    }
    started
}

/// Threads set aside for remedial work out of `max_threads`.
pub(super) fn remedial_slice(max_threads: u32, config: &BatchConfig) -> u32 {
    (max_threads as f64 * config.remedial_reservation).floor() as u32
}

/// Fill `cache` with estimates for every eligible target it lacks.
fn fetch_estimates<E: Environment + ?Sized>(
    env: &mut E,
    snapshot: &EnvironmentSnapshot,
    cache: &mut FxHashMap<String, TargetEstimates>,
) -> Result<(), EnvironmentError> {
    for target in snapshot.targets.iter().filter(|t| is_eligible(t)) {
        if cache.contains_key(&target.id) {
            continue;
        }
        let estimates = env.estimate(target)?;
        cache.insert(target.id.clone(), estimates);
    }
    Ok(())
}

/// Batch scheduler: keeps every target's batches in step with the clock and
/// the thread budget.
///
/// Each [`run_pass`](Self::run_pass) performs three sub-passes against fresh
/// snapshots: remedial work for unprepared targets, maintenance of live
/// batches, and creation of new batches.
pub struct BatchScheduler<C: Clock = SystemClock> {
    config: BatchConfig,
    ledger_config: LedgerConfig,
    window: BatchWindow,
    store: BatchStore,
    clock: C,
    ids: CorrelationIds,
}

impl<C: Clock> BatchScheduler<C> {
    /// Create a new scheduler.
    pub fn new(
        config: BatchConfig,
        ledger_config: LedgerConfig,
        clock: C,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        ledger_config
            .validate()
            .map_err(SchedulerError::InvalidConfig)?;

        Ok(Self {
            window: BatchWindow::from_config(&config),
            config,
            ledger_config,
            store: BatchStore::new(),
            clock,
            ids: CorrelationIds::default(),
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn window(&self) -> &BatchWindow {
        &self.window
    }

    pub fn store(&self) -> &BatchStore {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Run one scheduling pass.
    ///
    /// Snapshot and estimate failures abort the pass; dispatch failures are
    /// counted in the report and retried on later passes.
    pub fn run_pass<E: Environment + ?Sized>(
        &mut self,
        env: &mut E,
    ) -> Result<PassReport, SchedulerError> {
        let verbosity = self.config.verbosity;
        let mut report = PassReport::default();
        let mut estimates: FxHashMap<String, TargetEstimates> = FxHashMap::default();

        report.batches_retired += self.store.retire_expired(&self.window, self.clock.now());

        // Phase 1: remedial fortify/grow
        let snapshot = env.snapshot()?;
        let mut ledger = self.build_ledger(&snapshot);
        fetch_estimates(env, &snapshot, &mut estimates)?;
        let max_batch_threads = ledger
            .max_threads()
            .saturating_sub(remedial_slice(ledger.max_threads(), &self.config));
        let ranked = rank_targets(&snapshot.targets, &estimates, max_batch_threads, &self.config);
        log_debug!(
            verbosity,
            "Ranked {} targets (batch budget {} threads): {:?}",
            ranked.len(),
            max_batch_threads,
            ranked
        );
        self.remedial_pass(env, &snapshot, &mut ledger, &ranked, &estimates, &mut report);

        // Phase 2: dispatch pending phases whose windows have arrived
        let snapshot = env.snapshot()?;
        let mut ledger = self.build_ledger(&snapshot);
        fetch_estimates(env, &snapshot, &mut estimates)?;
        self.maintenance_pass(env, &snapshot, &mut ledger, &estimates, &mut report);

        // Phase 3: start new batches
        let snapshot = env.snapshot()?;
        let mut ledger = self.build_ledger(&snapshot);
        fetch_estimates(env, &snapshot, &mut estimates)?;
        self.creation_pass(env, &snapshot, &mut ledger, &ranked, &estimates, &mut report);

        if report != PassReport::default() {
            log_changes!(
                verbosity,
                "Pass: {} remedial, {} phases, {} new, {} retired, {} failed ({} batches live)",
                report.remedial_dispatches,
                report.phases_dispatched,
                report.batches_created,
                report.batches_retired,
                report.dispatch_failures,
                self.store.batch_count()
            );
        }

        Ok(report)
    }

    fn build_ledger(&self, snapshot: &EnvironmentSnapshot) -> ThreadLedger {
        ThreadLedger::from_snapshot(&snapshot.workers, &snapshot.operations, &self.ledger_config)
    }

    fn dispatch<E: Environment + ?Sized>(
        &mut self,
        env: &mut E,
        ledger: &mut ThreadLedger,
        report: &mut PassReport,
        plan: OperationPlan<'_>,
    ) -> u32 {
        dispatch_spread(env, ledger, &mut self.ids, report, plan, self.config.verbosity)
    }

    /// Fortify and regrow targets that are not batch-ready, out of the
    /// remedial slice of the thread budget.
    fn remedial_pass<E: Environment + ?Sized>(
        &mut self,
        env: &mut E,
        snapshot: &EnvironmentSnapshot,
        ledger: &mut ThreadLedger,
        ranked: &[String],
        estimates: &FxHashMap<String, TargetEstimates>,
        report: &mut PassReport,
    ) {
        let verbosity = self.config.verbosity;
        let slice = remedial_slice(ledger.max_threads(), &self.config);
        let mut budget = slice.saturating_sub(ledger.remedial_threads());
        log_debug!(
            verbosity,
            "Remedial budget: {} of {} ({} running)",
            budget,
            slice,
            ledger.remedial_threads()
        );

        for target in remedial_candidates(ranked, snapshot, &self.store) {
            let available = budget.min(ledger.free_threads());
            if available == 0 {
                log_checks!(verbosity, "  Remedial budget exhausted at {}", target.id);
                break;
            }

            let mut used = 0;
            if target.security != target.min_security {
                let threads = fortify_threads(
                    target.security - target.min_security,
                    Some(available),
                    &self.config,
                )
                .threads()
                .unwrap_or(0);
                let started = self.dispatch(
                    env,
                    ledger,
                    report,
                    OperationPlan {
                        kind: OperationKind::Fortify,
                        target_id: &target.id,
                        threads,
                        tag: DispatchTag::Remedial,
                    },
                );
                if started > 0 {
                    report.remedial_dispatches += 1;
                    log_changes!(
                        verbosity,
                        "Fortifying {} ({:.2} -> {:.2}) with {} threads",
                        target.id,
                        target.security,
                        target.min_security,
                        started
                    );
                }
                used += started;
            }

            let remaining = available.saturating_sub(used);
            if target.current_yield != target.max_yield && remaining > 0 {
                match estimates.get(&target.id) {
                    Some(est) => {
                        used += self.remedial_grow(env, ledger, report, target, est, remaining);
                    }
                    None => {
                        log_checks!(verbosity, "  No estimates for {}; not growing", target.id);
                    }
                }
            }

            budget = budget.saturating_sub(used);
        }
    }

    fn remedial_grow<E: Environment + ?Sized>(
        &mut self,
        env: &mut E,
        ledger: &mut ThreadLedger,
        report: &mut PassReport,
        target: &Target,
        estimates: &TargetEstimates,
        available: u32,
    ) -> u32 {
        let verbosity = self.config.verbosity;
        let allocation = grow_threads(
            target.max_yield,
            target.current_yield,
            available,
            estimates.grow_factor_per_thread,
            &self.config,
        );
        if !allocation.is_exact() {
            log_debug!(
                verbosity,
                "  Grow for {} capped at {} threads",
                target.id,
                available
            );
        }
        let Some(threads) = allocation.threads() else {
            return 0;
        };

        let mut used = 0;
        for (kind, count) in [
            (OperationKind::Grow, threads.grow),
            (OperationKind::Fortify, threads.fortify),
        ] {
            let started = self.dispatch(
                env,
                ledger,
                report,
                OperationPlan {
                    kind,
                    target_id: &target.id,
                    threads: count,
                    tag: DispatchTag::Remedial,
                },
            );
            if started > 0 {
                report.remedial_dispatches += 1;
                log_changes!(
                    verbosity,
                    "Growing {} ({:.0}/{:.0}): {} x{}",
                    target.id,
                    target.current_yield,
                    target.max_yield,
                    kind.as_str(),
                    started
                );
            }
            used += started;
        }
        used
    }

    /// Dispatch every pending phase whose window has arrived.
    fn maintenance_pass<E: Environment + ?Sized>(
        &mut self,
        env: &mut E,
        snapshot: &EnvironmentSnapshot,
        ledger: &mut ThreadLedger,
        estimates: &FxHashMap<String, TargetEstimates>,
        report: &mut PassReport,
    ) {
        let verbosity = self.config.verbosity;
        let now = self.clock.now();

        for target_id in self.store.batching_targets() {
            let Some(target) = snapshot.target(&target_id) else {
                log_checks!(verbosity, "  {} left the snapshot; batches drain", target_id);
                continue;
            };
            if needs_remedial(target, &self.config) {
                log_checks!(
                    verbosity,
                    "  {} below extraction floor ({:.3}); holding phases",
                    target_id,
                    target.yield_ratio()
                );
                continue;
            }
            let Some(est) = estimates.get(&target_id) else {
                continue;
            };
            let due = match self.store.get(&target_id) {
                Some(entry) => entry.due_phases(&self.window, now, est),
                None => continue,
            };

            for phase in due {
                let started = self.dispatch(
                    env,
                    ledger,
                    report,
                    OperationPlan {
                        kind: phase.kind.operation(),
                        target_id: &target_id,
                        threads: phase.threads,
                        tag: DispatchTag::Batch,
                    },
                );
                if started == 0 {
                    continue;
                }
                if let Some(entry) = self.store.get_mut(&target_id) {
                    entry.record_dispatch(phase.batch_id, phase.kind, phase.completes_at);
                }
                report.phases_dispatched += 1;
                log_changes!(
                    verbosity,
                    "{} batch {}: {} x{} lands {}",
                    target_id,
                    phase.batch_id,
                    phase.kind.as_str(),
                    started,
                    phase.completes_at.format("%H:%M:%S%.3f")
                );
            }
        }
    }

    /// Offer the remaining budget to candidates in rank order.
    ///
    /// Every candidate is charged the threads it would need to batch back to
    /// back, whether or not it gets a batch now, so lower-ranked targets only
    /// see what higher-ranked ones will not grow into.
    fn creation_pass<E: Environment + ?Sized>(
        &mut self,
        env: &mut E,
        snapshot: &EnvironmentSnapshot,
        ledger: &mut ThreadLedger,
        ranked: &[String],
        estimates: &FxHashMap<String, TargetEstimates>,
        report: &mut PassReport,
    ) {
        let verbosity = self.config.verbosity;
        let now = self.clock.now();
        let batching = self.store.batching_targets();
        let mut free = ledger.free_threads() as i64 - self.store.reserved_threads() as i64;
        log_debug!(
            verbosity,
            "Creation budget: {} free, {} reserved",
            ledger.free_threads(),
            self.store.reserved_threads()
        );

        for target in batch_candidates(ranked, snapshot, &batching) {
            if free < self.config.min_free_threads as i64 {
                log_checks!(verbosity, "  Out of threads ({} free)", free);
                break;
            }

            report.batches_retired += self.store.entry(&target.id).retire(&self.window, now);

            if needs_remedial(target, &self.config) {
                log_checks!(verbosity, "  {} below extraction floor; no new batch", target.id);
                continue;
            }
            let Some(est) = estimates.get(&target.id) else {
                continue;
            };

            let ideal = extraction_threads(
                est.extract_fraction_per_thread,
                u32::MAX,
                est.grow_factor_per_thread,
                &self.config,
            )
            .threads()
            .map(|counts| ideal_batch_threads(&counts, est.fortify_ms, &self.config))
            .unwrap_or(0);
            let charge = ideal.saturating_sub(ledger.threads_against(&target.id)) as i64;
            log_debug!(
                verbosity,
                "  {}: running {} ideal {} free {}",
                target.id,
                ledger.threads_against(&target.id),
                ideal,
                free
            );

            let anchor_end = now + millis(est.fortify_ms);
            if !self.store.entry(&target.id).admits(&self.window, anchor_end) {
                log_checks!(verbosity, "  {}: previous batch still too close", target.id);
                free -= charge;
                continue;
            }

            let counts = match extraction_threads(
                est.extract_fraction_per_thread,
                free.max(0) as u32,
                est.grow_factor_per_thread,
                &self.config,
            ) {
                Allocation::Exact(counts) => counts,
                _ => {
                    log_checks!(verbosity, "  {}: batch does not fit {} threads", target.id, free);
                    free -= charge;
                    continue;
                }
            };

            let started = self.dispatch(
                env,
                ledger,
                report,
                OperationPlan {
                    kind: OperationKind::Fortify,
                    target_id: &target.id,
                    threads: counts.hack_weaken,
                    tag: DispatchTag::Batch,
                },
            );
            if started == 0 {
                tracing::warn!(target_id = %target.id, "Anchor not started; no batch created");
                free -= charge;
                continue;
            }

            let batch_id = self.store.next_batch_id();
            let batch = Batch::new(batch_id, target.id.clone(), &counts, anchor_end);
            // Pending phases hold their threads even when nothing is charged
            let committed = (started + batch.reserved_threads()) as i64;
            self.store.entry(&target.id).push(batch);
            report.batches_created += 1;
            log_changes!(
                verbosity,
                "{} batch {}: hack {} / hack-weaken {} / grow {} / grow-weaken {}, anchor lands {}",
                target.id,
                batch_id,
                counts.hack,
                counts.hack_weaken,
                counts.grow,
                counts.grow_weaken,
                anchor_end.format("%H:%M:%S%.3f")
            );
            free -= charge.max(committed);
        }
    }
}

impl BatchScheduler<SystemClock> {
    /// Scheduler driven by wall-clock time.
    pub fn with_system_clock(
        config: BatchConfig,
        ledger_config: LedgerConfig,
    ) -> Result<Self, SchedulerError> {
        Self::new(config, ledger_config, SystemClock)
    }
}
