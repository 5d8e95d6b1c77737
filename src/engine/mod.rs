// src/engine/mod.rs
pub mod scheduler;
pub mod types;

pub use scheduler::{Scheduler, Sweep};
pub use types::{CycleReport, Endpoint, FetchError, FetchTarget, Outcome, Snapshot};
