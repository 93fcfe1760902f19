//! Collaborator traits the scheduling core needs from its host, plus the
//! injectable clock.

use chrono::{DateTime, Duration, Utc};
use std::cell::Cell;
use thiserror::Error;

use crate::models::{DispatchRequest, EnvironmentSnapshot, Target, TargetEstimates};

/// Errors reported by collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvironmentError {
    #[error("Snapshot failed: {0}")]
    Snapshot(String),
    #[error("Estimate failed for {target}: {reason}")]
    Estimate { target: String, reason: String },
    #[error("Dispatch of {kind} against {target} on {worker} failed: {reason}")]
    Dispatch {
        kind: String,
        target: String,
        worker: String,
        reason: String,
    },
    #[error("Collaborator error: {0}")]
    Collaborator(String),
}

/// Supplies a fresh, complete view of targets and workers.
pub trait Topology {
    fn snapshot(&mut self) -> Result<EnvironmentSnapshot, EnvironmentError>;
}

/// Starts operations on worker nodes. Fire-and-forget: only an error is
/// consulted.
pub trait Dispatcher {
    fn dispatch(&mut self, request: &DispatchRequest) -> Result<(), EnvironmentError>;
}

/// Point estimates of durations and per-thread effects for a target.
pub trait Estimator {
    fn estimate(&mut self, target: &Target) -> Result<TargetEstimates, EnvironmentError>;
}

/// Everything a scheduling pass talks to.
pub trait Environment: Topology + Dispatcher + Estimator {}

impl<T: Topology + Dispatcher + Estimator> Environment for T {}

/// Source of wall-clock time. Every `now()` read in the scheduler goes
/// through here.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    /// Block until `duration` has passed.
    fn sleep(&self, duration: Duration);
}

/// Real time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        if let Ok(std_duration) = duration.to_std() {
            std::thread::sleep(std_duration);
        }
    }
}

/// Clock that only moves when told to; `sleep` advances it instantly.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.now.set(now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Convert an estimated duration in milliseconds into a chrono `Duration`.
pub fn millis(ms: f64) -> Duration {
    if !ms.is_finite() || ms <= 0.0 {
        return Duration::zero();
    }
    Duration::milliseconds(ms.round() as i64)
}
