//! Batch lifecycle: phases, timing windows and the per-target ledger.
//!
//! A batch is created with its anchor (the fortify covering the extraction)
//! already dispatched. Its other phases wait in the store until a pass finds
//! their window open, and the batch is dropped once its closing phase has
//! landed.

mod state;
mod store;
mod window;

pub use state::{Batch, Phase, PhaseKind};
pub use store::{BatchStore, DuePhase, TargetBatches};
pub use window::BatchWindow;
