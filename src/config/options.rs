// src/config/options.rs
use std::path::PathBuf;
use std::time::Duration;

use super::consts::*;
use crate::core::code::{self, LocationCode};
use crate::error::{Result, ScrapeError};

/// Where the set of location codes comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodeSelector {
    /// Inclusive range, e.g. W000001..=W010000.
    Range { start: String, end: String },
    /// Text file, one code per line.
    File(PathBuf),
    /// Explicit list.
    Codes(Vec<String>),
}

impl CodeSelector {
    /// Resolve to a sorted, de-duplicated list of valid codes.
    pub fn resolve(&self) -> Result<Vec<LocationCode>> {
        let mut codes = match self {
            CodeSelector::Range { start, end } => {
                let start = LocationCode::parse(start)?;
                let end = LocationCode::parse(end)?;
                LocationCode::range(&start, &end)?
            }
            CodeSelector::File(path) => code::load_codes_file(path)?,
            CodeSelector::Codes(raw) => code::parse_codes(raw),
        };

        codes.sort_unstable();
        codes.dedup();

        if codes.is_empty() {
            return Err(ScrapeError::InvalidRange(s!("no valid location codes")));
        }
        Ok(codes)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScrapeOptions {
    pub codes: CodeSelector,
    /// Target time between sweep starts.
    pub interval: Duration,
    /// Hard cap on in-flight fetches.
    pub max_concurrent: usize,
    pub fetch_timeout: Duration,
    /// How long in-flight fetches may drain after cancellation.
    pub drain_grace: Duration,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub api_base: String,
}

impl ScrapeOptions {
    pub fn new(codes: CodeSelector) -> Self {
        Self {
            codes,
            interval: Duration::from_secs(DEFAULT_INTERVAL_MINUTES * 60),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            fetch_timeout: FETCH_TIMEOUT,
            drain_grace: DRAIN_GRACE,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            api_base: s!(API_BASE),
        }
    }
}
