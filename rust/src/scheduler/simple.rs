//! Single-target routine without batching.
//!
//! Each idle target gets one round of work sized to its share of the free
//! threads: fortify if security is above minimum, otherwise grow if yield is
//! below maximum, otherwise an extract/grow/fortify cycle. Nothing is tracked
//! between passes; a target is simply left alone while anything runs against
//! it.

use std::cmp::Ordering;

use crate::config::{BatchConfig, LedgerConfig};
use crate::environment::Environment;
use crate::ledger::ThreadLedger;
use crate::models::{DispatchTag, OperationKind, PassReport, Target};
use crate::selector::is_eligible;
use crate::thread_math::{fortify_threads, grow_threads, simple_cycle_threads};
use crate::{log_changes, log_checks};

use super::core::{dispatch_spread, CorrelationIds, OperationPlan, SchedulerError};

pub struct SimpleScheduler {
    config: BatchConfig,
    ledger_config: LedgerConfig,
    ids: CorrelationIds,
}

impl SimpleScheduler {
    pub fn new(config: BatchConfig, ledger_config: LedgerConfig) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        ledger_config
            .validate()
            .map_err(SchedulerError::InvalidConfig)?;
        Ok(Self {
            config,
            ledger_config,
            ids: CorrelationIds::default(),
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn run_pass<E: Environment + ?Sized>(
        &mut self,
        env: &mut E,
    ) -> Result<PassReport, SchedulerError> {
        let verbosity = self.config.verbosity;
        let mut report = PassReport::default();

        let snapshot = env.snapshot()?;
        let mut ledger =
            ThreadLedger::from_snapshot(&snapshot.workers, &snapshot.operations, &self.ledger_config);

        let mut targets: Vec<&Target> = snapshot
            .targets
            .iter()
            .filter(|t| {
                is_eligible(t)
                    && snapshot.skill >= t.required_skill
                    && !snapshot.is_targeted(&t.id)
            })
            .collect();
        targets.sort_by(|a, b| {
            b.max_yield
                .partial_cmp(&a.max_yield)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        // Spread over one target per `threads_per_cycle_target` free threads
        let mut slots = ledger
            .free_threads()
            .div_ceil(self.config.threads_per_cycle_target)
            .min(targets.len() as u32);

        for target in targets {
            if slots == 0 {
                break;
            }
            let share = ledger.free_threads() / slots;
            if slots > 1 {
                slots -= 1;
            }
            if share == 0 {
                log_checks!(verbosity, "  No threads left for {}", target.id);
                break;
            }

            if target.security != target.min_security {
                let threads = fortify_threads(
                    target.security - target.min_security,
                    Some(share),
                    &self.config,
                )
                .threads()
                .unwrap_or(0);
                log_changes!(verbosity, "Fortifying {} with {} threads", target.id, threads);
                self.start(env, &mut ledger, &mut report, target, &[(OperationKind::Fortify, threads)]);
                continue;
            }

            let estimates = env.estimate(target)?;

            if target.current_yield != target.max_yield {
                let Some(alloc) = grow_threads(
                    target.max_yield,
                    target.current_yield,
                    share,
                    estimates.grow_factor_per_thread,
                    &self.config,
                )
                .threads() else {
                    continue;
                };
                log_changes!(
                    verbosity,
                    "Growing {} with {} grow / {} fortify",
                    target.id,
                    alloc.grow,
                    alloc.fortify
                );
                self.start(
                    env,
                    &mut ledger,
                    &mut report,
                    target,
                    &[
                        (OperationKind::Grow, alloc.grow),
                        (OperationKind::Fortify, alloc.fortify),
                    ],
                );
                continue;
            }

            let Some(cycle) = simple_cycle_threads(
                estimates.extract_fraction_per_thread,
                share,
                estimates.grow_factor_per_thread,
                &self.config,
            )
            .threads() else {
                continue;
            };
            log_changes!(
                verbosity,
                "Cycling {}: {} extract / {} grow / {} fortify",
                target.id,
                cycle.extract,
                cycle.grow,
                cycle.fortify
            );
            self.start(
                env,
                &mut ledger,
                &mut report,
                target,
                &[
                    (OperationKind::Extract, cycle.extract),
                    (OperationKind::Grow, cycle.grow),
                    (OperationKind::Fortify, cycle.fortify),
                ],
            );
        }

        Ok(report)
    }

    fn start<E: Environment + ?Sized>(
        &mut self,
        env: &mut E,
        ledger: &mut ThreadLedger,
        report: &mut PassReport,
        target: &Target,
        operations: &[(OperationKind, u32)],
    ) {
        for &(kind, threads) in operations {
            let started = dispatch_spread(
                env,
                ledger,
                &mut self.ids,
                report,
                OperationPlan {
                    kind,
                    target_id: &target.id,
                    threads,
                    tag: DispatchTag::Cycle,
                },
                self.config.verbosity,
            );
            if started > 0 {
                report.cycle_dispatches += 1;
            }
        }
    }
}
