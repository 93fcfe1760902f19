//! Per-target batch ledger owned by the scheduler.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use super::state::{Batch, PhaseKind};
use super::window::BatchWindow;
use crate::environment::millis;
use crate::models::TargetEstimates;

/// Order pending phases are checked in on every maintenance pass.
const MAINTENANCE_ORDER: [PhaseKind; 3] = [PhaseKind::GrowWeaken, PhaseKind::Grow, PhaseKind::Hack];

/// A pending phase whose window has arrived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuePhase {
    pub batch_id: u64,
    pub kind: PhaseKind,
    pub threads: u32,
    /// Predicted completion if dispatched now
    pub completes_at: DateTime<Utc>,
}

/// Live batches against one target, oldest first.
#[derive(Clone, Debug, Default)]
pub struct TargetBatches {
    pub target_id: String,
    batches: Vec<Batch>,
}

impl TargetBatches {
    pub fn new(target_id: String) -> Self {
        Self {
            target_id,
            batches: Vec::new(),
        }
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// The most recently created batch.
    pub fn latest(&self) -> Option<&Batch> {
        self.batches.last()
    }

    /// Drop retired batches. Returns how many were dropped.
    pub fn retire(&mut self, window: &BatchWindow, now: DateTime<Utc>) -> usize {
        let before = self.batches.len();
        self.batches.retain(|b| !b.is_retired(window, now));
        before - self.batches.len()
    }

    /// Whether a new anchor landing at `new_anchor_end` may start.
    pub fn admits(&self, window: &BatchWindow, new_anchor_end: DateTime<Utc>) -> bool {
        let previous_end = self.latest().map(|b| b.projected_end(window));
        window.admits(previous_end, new_anchor_end)
    }

    /// Pending phases whose window has arrived at `now`.
    pub fn due_phases(
        &self,
        window: &BatchWindow,
        now: DateTime<Utc>,
        estimates: &TargetEstimates,
    ) -> Vec<DuePhase> {
        let mut due = Vec::new();
        for batch in &self.batches {
            for kind in MAINTENANCE_ORDER {
                let Some(phase) = batch.phase(kind) else {
                    continue;
                };
                if !phase.is_pending() {
                    continue;
                }
                let landing = now + millis(estimates.duration_ms(kind.operation()));
                if window.is_due(kind, batch.anchor_end(), landing) {
                    due.push(DuePhase {
                        batch_id: batch.id,
                        kind,
                        threads: phase.threads,
                        completes_at: landing,
                    });
                }
            }
        }
        due
    }

    /// Record a dispatched phase. False if the batch is gone or the phase was
    /// already recorded.
    pub fn record_dispatch(
        &mut self,
        batch_id: u64,
        kind: PhaseKind,
        completes_at: DateTime<Utc>,
    ) -> bool {
        self.batches
            .iter_mut()
            .find(|b| b.id == batch_id)
            .is_some_and(|b| b.record_dispatch(kind, completes_at))
    }

    pub fn push(&mut self, batch: Batch) {
        self.batches.push(batch);
    }

    pub fn reserved_threads(&self) -> u32 {
        self.batches.iter().map(Batch::reserved_threads).sum()
    }

    pub fn running_threads(&self, now: DateTime<Utc>) -> u32 {
        self.batches.iter().map(|b| b.running_threads(now)).sum()
    }
}

/// All batch state, keyed by target id.
///
/// Process-local and rebuilt from nothing on restart.
#[derive(Clone, Debug, Default)]
pub struct BatchStore {
    entries: FxHashMap<String, TargetBatches>,
    next_id: u64,
}

impl BatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry for `target_id`, created on first touch.
    pub fn entry(&mut self, target_id: &str) -> &mut TargetBatches {
        self.entries
            .entry(target_id.to_string())
            .or_insert_with(|| TargetBatches::new(target_id.to_string()))
    }

    pub fn get(&self, target_id: &str) -> Option<&TargetBatches> {
        self.entries.get(target_id)
    }

    pub fn get_mut(&mut self, target_id: &str) -> Option<&mut TargetBatches> {
        self.entries.get_mut(target_id)
    }

    pub fn next_batch_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Retire finished batches everywhere. Returns how many were dropped.
    pub fn retire_expired(&mut self, window: &BatchWindow, now: DateTime<Utc>) -> usize {
        self.entries.values_mut().map(|e| e.retire(window, now)).sum()
    }

    /// Targets with at least one live batch, sorted by id.
    pub fn batching_targets(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .values()
            .filter(|e| !e.is_empty())
            .map(|e| e.target_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn is_batching(&self, target_id: &str) -> bool {
        self.entries.get(target_id).is_some_and(|e| !e.is_empty())
    }

    /// Threads held for pending phases across every target.
    pub fn reserved_threads(&self) -> u32 {
        self.entries.values().map(TargetBatches::reserved_threads).sum()
    }

    /// Threads of dispatched phases predicted to still be running.
    pub fn running_threads(&self, now: DateTime<Utc>) -> u32 {
        self.entries.values().map(|e| e.running_threads(now)).sum()
    }

    pub fn batch_count(&self) -> usize {
        self.entries.values().map(|e| e.batches().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread_math::BatchThreadCounts;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn ms(n: i64) -> Duration {
        Duration::milliseconds(n)
    }

    fn counts() -> BatchThreadCounts {
        BatchThreadCounts {
            hack: 50,
            hack_weaken: 2,
            grow: 75,
            grow_weaken: 6,
        }
    }

    fn estimates(fortify_ms: f64, grow_ms: f64, extract_ms: f64) -> TargetEstimates {
        TargetEstimates {
            fortify_ms,
            grow_ms,
            extract_ms,
            extract_fraction_per_thread: 0.01,
            grow_factor_per_thread: 1.01,
        }
    }

    #[test]
    fn test_entry_is_lazy() {
        let mut store = BatchStore::new();
        assert!(store.get("t").is_none());
        store.entry("t");
        assert!(store.get("t").is_some());
        assert!(!store.is_batching("t"));
    }

    #[test]
    fn test_batch_ids_increase() {
        let mut store = BatchStore::new();
        let a = store.next_batch_id();
        let b = store.next_batch_id();
        assert!(b > a);
    }

    #[test]
    fn test_first_batch_always_admitted() {
        let entry = TargetBatches::new("t".to_string());
        assert!(entry.admits(&BatchWindow::default(), t0()));
    }

    #[test]
    fn test_admission_against_synthetic_end() {
        let window = BatchWindow::new(1000, 150);
        let mut entry = TargetBatches::new("t".to_string());
        entry.push(Batch::new(1, "t".to_string(), &counts(), t0() + ms(10_000)));
        // projected end = 10_000 + 2300; needs another 1300
        assert!(!entry.admits(&window, t0() + ms(13_599)));
        assert!(entry.admits(&window, t0() + ms(13_600)));
    }

    #[test]
    fn test_due_phases_follow_their_windows() {
        // Anchor lands 10s out; grow takes 8s, extract 2.5s
        let window = BatchWindow::new(1000, 150);
        let mut entry = TargetBatches::new("t".to_string());
        entry.push(Batch::new(1, "t".to_string(), &counts(), t0() + ms(10_000)));

        let est = estimates(10_000.0, 8_000.0, 2_500.0);
        assert!(entry.due_phases(&window, t0(), &est).is_empty());
        assert!(entry.due_phases(&window, t0() + ms(1_299), &est).is_empty());

        // Grow-weaken lands 11.3s = anchor + W + 2G
        let due = entry.due_phases(&window, t0() + ms(1_300), &est);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].kind, PhaseKind::GrowWeaken);
        assert_eq!(due[0].threads, 6);

        // At 2.2s grow lands at 10.2s (>= anchor + G)
        let due = entry.due_phases(&window, t0() + ms(2_200), &est);
        let kinds: Vec<PhaseKind> = due.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![PhaseKind::GrowWeaken, PhaseKind::Grow]);
        assert_eq!(due[1].completes_at, t0() + ms(10_200));

        // At 7s the hack lands at 9.5s, inside (8.85s, 9.85s)
        let due = entry.due_phases(&window, t0() + ms(7_000), &est);
        let kinds: Vec<PhaseKind> = due.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![PhaseKind::GrowWeaken, PhaseKind::Grow, PhaseKind::Hack]
        );

        // At 7.4s it would land at 9.9s, past the slot
        let due = entry.due_phases(&window, t0() + ms(7_400), &est);
        assert!(due.iter().all(|d| d.kind != PhaseKind::Hack));
    }

    #[test]
    fn test_recorded_phase_is_never_due_again() {
        let window = BatchWindow::new(1000, 150);
        let mut entry = TargetBatches::new("t".to_string());
        entry.push(Batch::new(1, "t".to_string(), &counts(), t0() + ms(10_000)));
        let est = estimates(10_000.0, 8_000.0, 100_000.0);
        let now = t0() + ms(3_000);

        let due = entry.due_phases(&window, now, &est);
        assert_eq!(due.len(), 2);
        for d in &due {
            assert!(entry.record_dispatch(d.batch_id, d.kind, d.completes_at));
        }
        assert!(entry.due_phases(&window, now, &est).is_empty());
        assert!(!entry.record_dispatch(1, PhaseKind::Grow, now));
        assert!(!entry.record_dispatch(99, PhaseKind::Hack, now));
    }

    #[test]
    fn test_store_accounting_and_retirement() {
        let mut store = BatchStore::new();
        let id = store.next_batch_id();
        store
            .entry("t")
            .push(Batch::new(id, "t".to_string(), &counts(), t0() + ms(1_000)));
        assert_eq!(store.reserved_threads(), 131);
        assert_eq!(store.running_threads(t0()), 2);
        assert_eq!(store.batching_targets(), vec!["t".to_string()]);

        let entry = store.get_mut("t").unwrap();
        entry.record_dispatch(id, PhaseKind::GrowWeaken, t0() + ms(2_300));
        assert_eq!(store.reserved_threads(), 125);

        let window = BatchWindow::default();
        assert_eq!(store.retire_expired(&window, t0() + ms(2_299)), 0);
        assert_eq!(store.retire_expired(&window, t0() + ms(2_300)), 1);
        assert_eq!(store.batch_count(), 0);
        assert!(!store.is_batching("t"));
    }
}
