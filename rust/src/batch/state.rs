//! Batches and their phases.

use chrono::{DateTime, Utc};

use crate::models::OperationKind;
use crate::thread_math::BatchThreadCounts;

/// The four phases of a canonical batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    /// Fortify covering the extraction; the anchor.
    HackWeaken,
    /// Extraction.
    Hack,
    /// Fortify covering the grow.
    GrowWeaken,
    /// Regrowth.
    Grow,
}

impl PhaseKind {
    pub fn operation(&self) -> OperationKind {
        match self {
            Self::HackWeaken | Self::GrowWeaken => OperationKind::Fortify,
            Self::Hack => OperationKind::Extract,
            Self::Grow => OperationKind::Grow,
        }
    }

    /// Position in the order phases land at the target.
    fn landing_rank(&self) -> u8 {
        match self {
            Self::Hack => 0,
            Self::HackWeaken => 1,
            Self::Grow => 2,
            Self::GrowWeaken => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HackWeaken => "hack-weaken",
            Self::Hack => "hack",
            Self::GrowWeaken => "grow-weaken",
            Self::Grow => "grow",
        }
    }
}

/// One operation instance within a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Phase {
    pub kind: PhaseKind,
    pub threads: u32,
    /// Predicted completion; None while the phase is pending
    pub completes_at: Option<DateTime<Utc>>,
}

impl Phase {
    pub fn is_pending(&self) -> bool {
        self.completes_at.is_none()
    }
}

/// A per-target set of phases meant to land in a fixed order around the
/// anchor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub id: u64,
    pub target_id: String,
    anchor_end: DateTime<Utc>,
    phases: Vec<Phase>,
}

impl Batch {
    /// Create a batch whose anchor has just been dispatched to land at
    /// `anchor_end`.
    ///
    /// Non-anchor phases with no threads are left out, giving the shorter
    /// batch variants.
    pub fn new(
        id: u64,
        target_id: String,
        counts: &BatchThreadCounts,
        anchor_end: DateTime<Utc>,
    ) -> Self {
        let mut phases = vec![Phase {
            kind: PhaseKind::HackWeaken,
            threads: counts.hack_weaken,
            completes_at: Some(anchor_end),
        }];
        for (kind, threads) in [
            (PhaseKind::Hack, counts.hack),
            (PhaseKind::GrowWeaken, counts.grow_weaken),
            (PhaseKind::Grow, counts.grow),
        ] {
            if threads > 0 {
                phases.push(Phase {
                    kind,
                    threads,
                    completes_at: None,
                });
            }
        }
        Self {
            id,
            target_id,
            anchor_end,
            phases,
        }
    }

    /// Completion time of the anchor. Fixed for the batch's lifetime.
    pub fn anchor_end(&self) -> DateTime<Utc> {
        self.anchor_end
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn phase(&self, kind: PhaseKind) -> Option<&Phase> {
        self.phases.iter().find(|p| p.kind == kind)
    }

    pub fn pending_phases(&self) -> impl Iterator<Item = &Phase> {
        self.phases.iter().filter(|p| p.is_pending())
    }

    /// Any phase still pending.
    pub fn is_active(&self) -> bool {
        self.phases.iter().any(Phase::is_pending)
    }

    /// Record the predicted completion of a pending phase.
    ///
    /// Returns false, changing nothing, if the phase is absent or already
    /// dispatched; recorded times are never overwritten.
    pub fn record_dispatch(&mut self, kind: PhaseKind, completes_at: DateTime<Utc>) -> bool {
        match self.phases.iter_mut().find(|p| p.kind == kind) {
            Some(phase) if phase.is_pending() => {
                phase.completes_at = Some(completes_at);
                true
            }
            _ => false,
        }
    }

    /// The phase that lands last.
    pub fn closing_phase(&self) -> &Phase {
        self.phases
            .iter()
            .max_by_key(|p| p.kind.landing_rank())
            .unwrap_or(&self.phases[0])
    }

    /// Latest known landing time of the batch, or a synthetic estimate of
    /// `anchor + 2W + 2G` while the closing phase is still pending.
    pub fn projected_end(&self, window: &super::BatchWindow) -> DateTime<Utc> {
        match self.closing_phase().completes_at {
            Some(end) => end,
            None => window.synthetic_end(self.anchor_end),
        }
    }

    /// The closing phase has landed, or is still pending past the synthetic
    /// end, and nothing recorded is still in the future. Phases that never
    /// found their window are abandoned.
    pub fn is_retired(&self, window: &super::BatchWindow, now: DateTime<Utc>) -> bool {
        if self.closing_phase().is_pending() && now < window.synthetic_end(self.anchor_end) {
            return false;
        }
        self.phases
            .iter()
            .filter_map(|p| p.completes_at)
            .all(|end| end <= now)
    }

    /// Threads held for phases not yet dispatched.
    pub fn reserved_threads(&self) -> u32 {
        self.pending_phases().map(|p| p.threads).sum()
    }

    /// Threads of dispatched phases predicted to still be running.
    pub fn running_threads(&self, now: DateTime<Utc>) -> u32 {
        self.phases
            .iter()
            .filter(|p| p.completes_at.is_some_and(|end| end > now))
            .map(|p| p.threads)
            .sum()
    }
}
