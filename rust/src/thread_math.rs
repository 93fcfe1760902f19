//! Thread math for the three operation types.
//!
//! Every function is deterministic in its inputs and reports a tagged
//! [`Allocation`]: callers branch on whether the request was met exactly,
//! degraded to fit the cap, or could not be met at all.

use crate::config::BatchConfig;

/// Outcome of a thread calculation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Allocation<T> {
    /// The full requirement fits.
    Exact(T),
    /// Truncated or degraded to a fixed ratio to fit the budget; the caller
    /// should re-evaluate next pass.
    Capped(T),
    /// Cannot be met within the budget.
    Infeasible,
}

impl<T> Allocation<T> {
    /// The allocated threads, if any.
    pub fn threads(self) -> Option<T> {
        match self {
            Self::Exact(t) | Self::Capped(t) => Some(t),
            Self::Infeasible => None,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }
}

/// Grow threads plus the fortify threads that cover them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GrowAllocation {
    pub grow: u32,
    pub fortify: u32,
}

impl GrowAllocation {
    pub fn total(&self) -> u32 {
        self.grow + self.fortify
    }
}

/// Thread counts for the four phases of a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchThreadCounts {
    pub hack: u32,
    pub hack_weaken: u32,
    pub grow: u32,
    pub grow_weaken: u32,
}

impl BatchThreadCounts {
    pub fn total(&self) -> u32 {
        self.hack + self.hack_weaken + self.grow + self.grow_weaken
    }
}

/// Thread counts for one round of the single-target routine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleThreadCounts {
    pub extract: u32,
    pub grow: u32,
    pub fortify: u32,
}

impl CycleThreadCounts {
    pub fn total(&self) -> u32 {
        self.extract + self.grow + self.fortify
    }
}

// Division results such as 4.0 / 0.05 land a hair above the integer.
const CEIL_EPSILON: f64 = 1e-9;

fn ceil_threads(value: f64) -> u32 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    let rounded = (value - CEIL_EPSILON).ceil();
    if rounded >= u32::MAX as f64 {
        u32::MAX
    } else {
        rounded as u32
    }
}

/// Grow threads needed to multiply a target's yield by `multiplier`, given the
/// multiplier one thread applies.
///
/// Returns None when growth per thread is unusable (at or below 1).
pub fn threads_for_growth(multiplier: f64, grow_factor_per_thread: f64) -> Option<u32> {
    if multiplier <= 1.0 {
        return Some(0);
    }
    if !(grow_factor_per_thread > 1.0) || !multiplier.is_finite() {
        return None;
    }
    Some(ceil_threads(multiplier.ln() / grow_factor_per_thread.ln()))
}

/// Fortify threads needed to lower security by `amount`.
///
/// Capped at `max_threads` when supplied; a capped result only reduces part of
/// the amount.
pub fn fortify_threads(
    amount: f64,
    max_threads: Option<u32>,
    config: &BatchConfig,
) -> Allocation<u32> {
    if amount <= 0.0 {
        return Allocation::Exact(0);
    }
    let needed = ceil_threads(amount / config.fortify_per_thread);
    match max_threads {
        Some(max) if needed > max => Allocation::Capped(max),
        _ => Allocation::Exact(needed),
    }
}

/// Grow and fortify threads to bring a target from `current_yield` back to
/// `max_yield` within `max_threads`.
pub fn grow_threads(
    max_yield: f64,
    current_yield: f64,
    max_threads: u32,
    grow_factor_per_thread: f64,
    config: &BatchConfig,
) -> Allocation<GrowAllocation> {
    if max_threads < config.min_grow_allocation {
        return Allocation::Capped(GrowAllocation {
            grow: max_threads,
            fortify: 0,
        });
    }

    let ratio_split = || {
        let per_unit = config.grow_per_fortify + 1;
        let grow = (max_threads as u64 * config.grow_per_fortify as u64 / per_unit as u64) as u32;
        Allocation::Capped(GrowAllocation {
            grow,
            fortify: max_threads - grow,
        })
    };

    if current_yield <= 0.0 {
        return ratio_split();
    }

    let multiplier = max_yield / current_yield + config.grow_multiplier_margin;
    let Some(grow) = threads_for_growth(multiplier, grow_factor_per_thread) else {
        return ratio_split();
    };
    let fortify = grow.div_ceil(config.grow_per_fortify);

    if grow as u64 + fortify as u64 > max_threads as u64 {
        return ratio_split();
    }

    Allocation::Exact(GrowAllocation { grow, fortify })
}

/// Threads for a full four-phase batch.
///
/// Extracts `extraction_fraction` of yield, regrows it with a buffer, and
/// fortifies away the security both raise. Never truncates: a batch that does
/// not fit is `Infeasible`.
pub fn extraction_threads(
    hack_percent: f64,
    max_threads: u32,
    grow_factor_per_thread: f64,
    config: &BatchConfig,
) -> Allocation<BatchThreadCounts> {
    if !(hack_percent > 0.0) {
        return Allocation::Infeasible;
    }

    let hack = ceil_threads(config.extraction_fraction / hack_percent).max(1);
    let taken = hack_percent * hack as f64;
    if taken >= 1.0 {
        return Allocation::Infeasible;
    }

    let hack_security = hack as f64 * config.extract_security_per_thread;
    let hack_weaken = fortify_threads(hack_security, None, config)
        .threads()
        .unwrap_or(0);

    let regrowth = 1.0 / (1.0 - taken) * config.regrow_buffer;
    let Some(grow) = threads_for_growth(regrowth, grow_factor_per_thread) else {
        return Allocation::Infeasible;
    };
    let grow_security = grow as f64 * config.grow_security_per_thread;
    let grow_weaken = fortify_threads(grow_security, None, config)
        .threads()
        .unwrap_or(0);

    let counts = BatchThreadCounts {
        hack,
        hack_weaken,
        grow,
        grow_weaken,
    };
    if counts.hack as u64 + counts.hack_weaken as u64 + counts.grow as u64 + counts.grow_weaken as u64
        > max_threads as u64
    {
        return Allocation::Infeasible;
    }

    Allocation::Exact(counts)
}

/// Threads a target needs to be batched back to back without idling: one
/// batch per `batch_span_ms` of fortify duration.
pub fn ideal_batch_threads(counts: &BatchThreadCounts, fortify_ms: f64, config: &BatchConfig) -> u32 {
    let concurrent = (fortify_ms / config.batch_span_ms).ceil().max(1.0) as u32;
    counts.total().saturating_mul(concurrent)
}

// Single-target routine constants.
const CYCLE_MIN_THREADS: u32 = 22;
const CYCLE_EXTRACT_FRACTION: f64 = 0.2;
const CYCLE_EXTRACT_ROUNDS: u32 = 3;
const CYCLE_GROW_MULTIPLIER: f64 = 2.1;
const CYCLE_RATIO: CycleThreadCounts = CycleThreadCounts {
    extract: 8,
    grow: 12,
    fortify: 2,
};

/// Threads for one extract/grow/fortify round of the single-target routine.
///
/// Unlike [`extraction_threads`] this never refuses: short budgets degrade to
/// an all-extract allocation or a fixed 8:12:2 ratio.
pub fn simple_cycle_threads(
    hack_percent: f64,
    max_threads: u32,
    grow_factor_per_thread: f64,
    config: &BatchConfig,
) -> Allocation<CycleThreadCounts> {
    if max_threads < CYCLE_MIN_THREADS {
        return Allocation::Capped(CycleThreadCounts {
            extract: max_threads,
            grow: 0,
            fortify: 0,
        });
    }

    let ratio_split = || {
        let units = max_threads / CYCLE_MIN_THREADS;
        Allocation::Capped(CycleThreadCounts {
            extract: CYCLE_RATIO.extract * units,
            grow: CYCLE_RATIO.grow * units,
            fortify: CYCLE_RATIO.fortify * units,
        })
    };

    if !(hack_percent > 0.0) {
        return ratio_split();
    }
    let Some(grow) = threads_for_growth(CYCLE_GROW_MULTIPLIER, grow_factor_per_thread) else {
        return ratio_split();
    };

    let extract = ceil_threads(CYCLE_EXTRACT_FRACTION / hack_percent).max(1);
    let security = (extract * CYCLE_EXTRACT_ROUNDS) as f64 * config.extract_security_per_thread
        + grow as f64 * config.grow_security_per_thread;
    let fortify = fortify_threads(security, None, config)
        .threads()
        .unwrap_or(0);

    let counts = CycleThreadCounts {
        extract,
        grow,
        fortify,
    };
    if counts.extract as u64 + counts.grow as u64 + counts.fortify as u64 > max_threads as u64 {
        return ratio_split();
    }
    Allocation::Exact(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BatchConfig {
        BatchConfig::default()
    }

    #[test]
    fn test_fortify_zero_amount() {
        assert_eq!(fortify_threads(0.0, None, &config()), Allocation::Exact(0));
        assert_eq!(fortify_threads(-3.0, Some(10), &config()), Allocation::Exact(0));
    }

    #[test]
    fn test_fortify_uncapped_is_ceil() {
        assert_eq!(fortify_threads(4.0, None, &config()), Allocation::Exact(80));
        assert_eq!(fortify_threads(0.051, None, &config()), Allocation::Exact(2));
        assert_eq!(fortify_threads(0.01, None, &config()), Allocation::Exact(1));
    }

    #[test]
    fn test_fortify_scenario_budget_100() {
        // security 5, minimum 1: 80 threads, 20 left over
        let alloc = fortify_threads(5.0 - 1.0, Some(100), &config());
        assert_eq!(alloc, Allocation::Exact(80));
    }

    #[test]
    fn test_fortify_capped() {
        assert_eq!(fortify_threads(4.0, Some(50), &config()), Allocation::Capped(50));
    }

    #[test]
    fn test_threads_for_growth() {
        assert_eq!(threads_for_growth(1.0, 1.01), Some(0));
        assert_eq!(threads_for_growth(2.0, 1.0), None);
        // ln(2) / ln(1.01) = 69.66
        assert_eq!(threads_for_growth(2.0, 1.01), Some(70));
    }

    #[test]
    fn test_grow_below_minimum_is_all_grow() {
        let alloc = grow_threads(1000.0, 500.0, 12, 1.01, &config());
        assert_eq!(alloc, Allocation::Capped(GrowAllocation { grow: 12, fortify: 0 }));
    }

    #[test]
    fn test_grow_empty_target_uses_ratio() {
        let alloc = grow_threads(1000.0, 0.0, 26, 1.01, &config());
        assert_eq!(alloc, Allocation::Capped(GrowAllocation { grow: 24, fortify: 2 }));
    }

    #[test]
    fn test_grow_exact() {
        // multiplier 2.1 -> ceil(ln 2.1 / ln 1.01) = 75 grow, ceil(75/12) = 7 fortify
        let alloc = grow_threads(1000.0, 500.0, 1000, 1.01, &config());
        assert_eq!(alloc, Allocation::Exact(GrowAllocation { grow: 75, fortify: 7 }));
    }

    #[test]
    fn test_grow_over_budget_falls_back_to_ratio() {
        let alloc = grow_threads(1000.0, 500.0, 50, 1.01, &config());
        let grow = alloc.threads().unwrap();
        assert!(!alloc.is_exact());
        assert_eq!(grow.total(), 50);
        assert_eq!(grow.grow, 46);
    }

    #[test]
    fn test_extraction_exact() {
        // 1% per thread: 50 hack threads take 50%
        let alloc = extraction_threads(0.01, 10_000, 1.01, &config());
        let counts = alloc.threads().unwrap();
        assert!(alloc.is_exact());
        assert_eq!(counts.hack, 50);
        // 50 * 0.002 = 0.1 security -> 2 fortify
        assert_eq!(counts.hack_weaken, 2);
        // regrow 2.0 * 1.05 = 2.1 -> 75 grow threads
        assert_eq!(counts.grow, 75);
        // 75 * 0.004 = 0.3 security -> 6 fortify
        assert_eq!(counts.grow_weaken, 6);
        assert_eq!(counts.total(), 133);
    }

    #[test]
    fn test_extraction_infeasible_over_budget() {
        assert_eq!(
            extraction_threads(0.01, 132, 1.01, &config()),
            Allocation::Infeasible
        );
    }

    #[test]
    fn test_extraction_infeasible_without_yield() {
        assert_eq!(extraction_threads(0.0, 10_000, 1.01, &config()), Allocation::Infeasible);
        assert_eq!(extraction_threads(1.0, 10_000, 1.01, &config()), Allocation::Infeasible);
        assert_eq!(extraction_threads(0.01, 10_000, 1.0, &config()), Allocation::Infeasible);
    }

    #[test]
    fn test_allocations_never_exceed_cap() {
        let cfg = config();
        for cap in [0u32, 1, 5, 12, 13, 14, 21, 22, 50, 133, 500] {
            if let Some(a) = fortify_threads(7.3, Some(cap), &cfg).threads() {
                assert!(a <= cap);
            }
            for current in [0.0, 1.0, 400.0, 999.0] {
                if let Some(a) = grow_threads(1000.0, current, cap, 1.004, &cfg).threads() {
                    assert!(a.total() <= cap, "grow {:?} over cap {}", a, cap);
                }
            }
            if let Some(a) = extraction_threads(0.003, cap, 1.004, &cfg).threads() {
                assert!(a.total() <= cap);
            }
            if let Some(a) = simple_cycle_threads(0.003, cap, 1.004, &cfg).threads() {
                assert!(a.total() <= cap, "cycle {:?} over cap {}", a, cap);
            }
        }
    }

    #[test]
    fn test_ideal_batch_threads() {
        let counts = BatchThreadCounts {
            hack: 50,
            hack_weaken: 2,
            grow: 75,
            grow_weaken: 6,
        };
        assert_eq!(ideal_batch_threads(&counts, 10_000.0, &config()), 133 * 3);
        assert_eq!(ideal_batch_threads(&counts, 0.0, &config()), 133);
    }

    #[test]
    fn test_simple_cycle_small_budget() {
        let alloc = simple_cycle_threads(0.01, 10, 1.01, &config());
        assert_eq!(
            alloc,
            Allocation::Capped(CycleThreadCounts {
                extract: 10,
                grow: 0,
                fortify: 0
            })
        );
    }

    #[test]
    fn test_simple_cycle_exact() {
        let alloc = simple_cycle_threads(0.01, 1000, 1.01, &config());
        // 20 extract, ceil(ln 2.1 / ln 1.01) = 75 grow,
        // 60 * 0.002 + 75 * 0.004 = 0.42 -> 9 fortify
        assert_eq!(
            alloc,
            Allocation::Exact(CycleThreadCounts {
                extract: 20,
                grow: 75,
                fortify: 9
            })
        );
    }

    #[test]
    fn test_simple_cycle_ratio_fallback() {
        let alloc = simple_cycle_threads(0.01, 50, 1.01, &config());
        assert_eq!(
            alloc,
            Allocation::Capped(CycleThreadCounts {
                extract: 16,
                grow: 24,
                fortify: 4
            })
        );
    }
}
