// src/engine/types.rs
use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};

use crate::core::code::LocationCode;

/// Which vendor endpoint a fetch hits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// Location metadata lookup by code. Used until the location is known.
    Location,
    /// Machine status for a known location, keyed by the vendor's ULN.
    Status { uln: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchTarget {
    pub code: LocationCode,
    pub endpoint: Endpoint,
}

impl FetchTarget {
    pub fn location(code: LocationCode) -> Self {
        Self { code, endpoint: Endpoint::Location }
    }

    pub fn status(code: LocationCode, uln: impl Into<String>) -> Self {
        Self { code, endpoint: Endpoint::Status { uln: uln.into() } }
    }
}

/// Why a fetch is worth retrying next cycle.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("network: {0}")]
    Network(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("unusable body: {0}")]
    Body(String),
    #[error("fetch task panicked")]
    Panicked,
}

/// Result of exactly one request for one location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success(Vec<u8>),
    NotFound,
    TransientError(FetchError),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::NotFound => "not_found",
            Outcome::TransientError(_) => "transient",
        }
    }
}

/// One capture of one location at one point in time.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub target: FetchTarget,
    pub retrieved_at: DateTime<Utc>,
    pub outcome: Outcome,
}

impl Snapshot {
    pub fn new(target: FetchTarget, outcome: Outcome) -> Self {
        Self { target, retrieved_at: Utc::now(), outcome }
    }

    pub fn code(&self) -> &LocationCode {
        &self.target.code
    }
}

/// Per-sweep counters. Logged at the idle transition, never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub attempted: usize,
    pub succeeded: usize,
    /// Location lookups that yielded a new ULN this sweep.
    pub discovered: usize,
    /// Codes newly added to the blacklist this sweep.
    pub not_found: usize,
    pub transient: usize,
    pub parse_errors: usize,
    pub storage_errors: usize,
    pub records: usize,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn new(cycle: u64) -> Self {
        Self { cycle, ..Default::default() }
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {}: {} attempted, {} ok ({} discovered, {} rows), {} not found, {} transient, {} parse errors, {} storage errors in {}",
            self.cycle,
            self.attempted,
            self.succeeded,
            self.discovered,
            self.records,
            self.not_found,
            self.transient,
            self.parse_errors,
            self.storage_errors,
            crate::log::fmt_elapsed(self.elapsed),
        )
    }
}
