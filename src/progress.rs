// src/progress.rs
use std::time::Duration;

use crate::engine::types::{CycleReport, Snapshot};

/// Hooks the orchestrator calls as a run advances.
/// Frontends (CLI, tests) implement what they care about.
pub trait Progress {
    /// A sweep is about to fan out `total` targets.
    fn sweep_started(&mut self, _cycle: u64, _total: usize) {}

    /// One result came back and has been handled.
    fn item_done(&mut self, _snapshot: &Snapshot) {}

    fn sweep_finished(&mut self, _report: &CycleReport) {}

    /// About to sleep until the next cadence boundary. Zero after an overrun.
    fn idle(&mut self, _wait: Duration) {}
}

/// A no-op progress sink.
pub struct NullProgress;
impl Progress for NullProgress {}
