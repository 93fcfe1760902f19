//! Configuration types for the batch scheduler.

use pyo3::prelude::*;

/// Timing, ratio and budget constants for batch scheduling.
///
/// The timing constants were tuned against a noisy duration estimator; treat
/// them as knobs rather than invariants.
#[pyclass]
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Batch window W in milliseconds
    #[pyo3(get, set)]
    pub batch_window_ms: i64,
    /// Enforced gap G in milliseconds between two landing phases
    #[pyo3(get, set)]
    pub enforced_gap_ms: i64,
    /// Fraction of a target's maximum yield one batch extracts
    #[pyo3(get, set)]
    pub extraction_fraction: f64,
    /// Extra margin below the post-extraction level before a target is
    /// considered in need of remedial work
    #[pyo3(get, set)]
    pub extraction_floor_margin: f64,
    /// Share of total max threads reserved for remedial fortify/grow work
    #[pyo3(get, set)]
    pub remedial_reservation: f64,
    /// Security removed by one fortify thread
    #[pyo3(get, set)]
    pub fortify_per_thread: f64,
    /// Security added by one extract thread
    #[pyo3(get, set)]
    pub extract_security_per_thread: f64,
    /// Security added by one grow thread
    #[pyo3(get, set)]
    pub grow_security_per_thread: f64,
    /// Grow threads covered by one fortify thread in remedial passes
    #[pyo3(get, set)]
    pub grow_per_fortify: u32,
    /// Below this many threads a remedial grow skips fortification entirely
    #[pyo3(get, set)]
    pub min_grow_allocation: u32,
    /// Additive margin on the remedial growth multiplier
    #[pyo3(get, set)]
    pub grow_multiplier_margin: f64,
    /// Multiplicative buffer on the batch regrowth multiplier
    #[pyo3(get, set)]
    pub regrow_buffer: f64,
    /// Creation pass stops once fewer free threads than this remain
    #[pyo3(get, set)]
    pub min_free_threads: u32,
    /// Fixed overhead added to the fortify duration when scoring targets (ms)
    #[pyo3(get, set)]
    pub score_overhead_ms: f64,
    /// Time a fully efficient batch occupies; sets the ideal concurrency (ms)
    #[pyo3(get, set)]
    pub batch_span_ms: f64,
    /// Free threads per target the single-target routine spreads over
    #[pyo3(get, set)]
    pub threads_per_cycle_target: u32,
    /// Sleep between scheduling passes (ms)
    #[pyo3(get, set)]
    pub pass_interval_ms: i64,
    /// Verbosity level: 0=silent, 1=changes, 2=checks, 3=debug
    #[pyo3(get, set)]
    pub verbosity: u8,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_window_ms: 1000,
            enforced_gap_ms: 150,
            extraction_fraction: 0.5,
            extraction_floor_margin: 0.05,
            remedial_reservation: 0.25,
            fortify_per_thread: 0.05,
            extract_security_per_thread: 0.002,
            grow_security_per_thread: 0.004,
            grow_per_fortify: 12,
            min_grow_allocation: 13,
            grow_multiplier_margin: 0.1,
            regrow_buffer: 1.05,
            min_free_threads: 4,
            score_overhead_ms: 3000.0,
            batch_span_ms: 4000.0,
            threads_per_cycle_target: 500,
            pass_interval_ms: 500,
            verbosity: 0,
        }
    }
}

#[pymethods]
impl BatchConfig {
    #[new]
    #[pyo3(signature = (
        batch_window_ms=1000,
        enforced_gap_ms=150,
        extraction_fraction=0.5,
        remedial_reservation=0.25,
        pass_interval_ms=500,
        verbosity=0
    ))]
    fn new(
        batch_window_ms: i64,
        enforced_gap_ms: i64,
        extraction_fraction: f64,
        remedial_reservation: f64,
        pass_interval_ms: i64,
        verbosity: u8,
    ) -> Self {
        Self {
            batch_window_ms,
            enforced_gap_ms,
            extraction_fraction,
            remedial_reservation,
            pass_interval_ms,
            verbosity,
            ..Self::default()
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "BatchConfig(batch_window_ms={}, enforced_gap_ms={}, extraction_fraction={}, verbosity={})",
            self.batch_window_ms, self.enforced_gap_ms, self.extraction_fraction, self.verbosity
        )
    }
}

impl BatchConfig {
    /// Check that the constants describe a schedulable configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_window_ms <= 0 {
            return Err(format!(
                "batch_window_ms must be positive, got {}",
                self.batch_window_ms
            ));
        }
        if self.enforced_gap_ms < 0 {
            return Err(format!(
                "enforced_gap_ms must not be negative, got {}",
                self.enforced_gap_ms
            ));
        }
        if !(self.extraction_fraction > 0.0 && self.extraction_fraction < 1.0) {
            return Err(format!(
                "extraction_fraction must be in (0, 1), got {}",
                self.extraction_fraction
            ));
        }
        if !(0.0..=1.0).contains(&self.remedial_reservation) {
            return Err(format!(
                "remedial_reservation must be in [0, 1], got {}",
                self.remedial_reservation
            ));
        }
        if self.fortify_per_thread <= 0.0 {
            return Err("fortify_per_thread must be positive".to_string());
        }
        if self.grow_per_fortify == 0 {
            return Err("grow_per_fortify must be at least 1".to_string());
        }
        if self.batch_span_ms <= 0.0 {
            return Err("batch_span_ms must be positive".to_string());
        }
        if self.threads_per_cycle_target == 0 {
            return Err("threads_per_cycle_target must be at least 1".to_string());
        }
        if self.pass_interval_ms < 0 {
            return Err("pass_interval_ms must not be negative".to_string());
        }
        Ok(())
    }

    /// Fraction of maximum yield below which a target needs remedial work
    /// instead of a new batch.
    pub fn extraction_floor(&self) -> f64 {
        1.0 - self.extraction_fraction - self.extraction_floor_margin
    }
}

/// Configuration for converting worker memory into threads.
#[pyclass]
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// Memory one thread of any operation costs
    #[pyo3(get, set)]
    pub thread_memory_cost: f64,
    /// Node whose capacity is reduced before conversion
    #[pyo3(get, set)]
    pub reserved_node: String,
    /// Memory held back on the reserved node for non-scheduler work
    #[pyo3(get, set)]
    pub reserved_memory: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            thread_memory_cost: 1.75,
            reserved_node: "home".to_string(),
            reserved_memory: 32.0,
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.thread_memory_cost > 0.0) {
            return Err(format!(
                "thread_memory_cost must be positive, got {}",
                self.thread_memory_cost
            ));
        }
        if self.reserved_memory < 0.0 {
            return Err("reserved_memory must not be negative".to_string());
        }
        Ok(())
    }
}

#[pymethods]
impl LedgerConfig {
    #[new]
    #[pyo3(signature = (thread_memory_cost=1.75, reserved_node=None, reserved_memory=32.0))]
    fn new(thread_memory_cost: f64, reserved_node: Option<String>, reserved_memory: f64) -> Self {
        Self {
            thread_memory_cost,
            reserved_node: reserved_node.unwrap_or_else(|| "home".to_string()),
            reserved_memory,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "LedgerConfig(thread_memory_cost={}, reserved_node={:?}, reserved_memory={})",
            self.thread_memory_cost, self.reserved_node, self.reserved_memory
        )
    }
}
