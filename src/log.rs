// src/log.rs
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::consts::LOG_FILE;
use crate::error::{Result, ScrapeError};

const DEFAULT_FILTER: &str = "wash_scrape=info";

/// Install the global subscriber: stdout plus an append-only file at
/// `<log_dir>/bulk_scraper.log`. `RUST_LOG` overrides the default filter.
pub fn init(log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir).map_err(|e| ScrapeError::storage(log_dir, e))?;

    let path = log_dir.join(LOG_FILE);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| ScrapeError::storage(&path, e))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init();

    Ok(())
}

/// `HH:MM:SS.mmm`, hours unbounded.
pub fn fmt_elapsed(d: Duration) -> String {
    let total_ms = d.as_millis() as u64;
    let h = total_ms / 3_600_000;
    let m = (total_ms % 3_600_000) / 60_000;
    let s = (total_ms % 60_000) / 1_000;
    let ms = total_ms % 1_000;
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}
