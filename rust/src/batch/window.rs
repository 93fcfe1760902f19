//! Timing-window arithmetic relative to a batch's anchor.
//!
//! With anchor landing time `A`, window `W` and gap `G`, phases land as:
//!
//! ```text
//!   hack         (A - W - G, A - G)    exclusive slot
//!   hack-weaken  A                     anchor
//!   grow         >= A + G
//!   grow-weaken  >= A + W + 2G
//! ```

use chrono::{DateTime, Duration, Utc};

use super::state::PhaseKind;
use crate::config::BatchConfig;

/// Batch window and enforced gap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchWindow {
    pub window: Duration,
    pub gap: Duration,
}

impl BatchWindow {
    pub fn new(window_ms: i64, gap_ms: i64) -> Self {
        Self {
            window: Duration::milliseconds(window_ms),
            gap: Duration::milliseconds(gap_ms),
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.batch_window_ms, config.enforced_gap_ms)
    }

    /// Minimum spacing between one batch's end and the next batch's anchor.
    pub fn separation(&self) -> Duration {
        self.window + self.gap * 2
    }

    /// Stand-in end for a batch whose closing phase is not dispatched yet.
    pub fn synthetic_end(&self, anchor_end: DateTime<Utc>) -> DateTime<Utc> {
        anchor_end + self.window * 2 + self.gap * 2
    }

    /// The exclusive slot an extraction must land in.
    pub fn hack_slot(&self, anchor_end: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = anchor_end - self.window - self.gap;
        (start, start + self.window)
    }

    /// Whether a phase dispatched now, landing at `landing`, is due.
    ///
    /// The anchor is never due here; it is dispatched when the batch is made.
    pub fn is_due(&self, kind: PhaseKind, anchor_end: DateTime<Utc>, landing: DateTime<Utc>) -> bool {
        match kind {
            PhaseKind::HackWeaken => false,
            PhaseKind::GrowWeaken => landing >= anchor_end + self.separation(),
            PhaseKind::Grow => landing >= anchor_end + self.gap,
            PhaseKind::Hack => {
                let (start, end) = self.hack_slot(anchor_end);
                landing > start && landing < end
            }
        }
    }

    /// Whether a new anchor landing at `new_anchor_end` sits far enough after
    /// the previous batch's projected end.
    pub fn admits(&self, previous_end: Option<DateTime<Utc>>, new_anchor_end: DateTime<Utc>) -> bool {
        match previous_end {
            None => true,
            Some(end) => new_anchor_end >= end + self.separation(),
        }
    }
}

impl Default for BatchWindow {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}
