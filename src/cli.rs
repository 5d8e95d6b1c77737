// src/cli.rs
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Parser};
use color_eyre::eyre::{Result, WrapErr, eyre};
use tokio_util::sync::CancellationToken;

use crate::config::consts::{
    API_BASE, DEFAULT_DATA_DIR, DEFAULT_INTERVAL_MINUTES, DEFAULT_LOG_DIR, DEFAULT_MAX_CONCURRENT, FETCH_TIMEOUT,
};
use crate::config::{CodeSelector, ScrapeOptions};
use crate::core::net::HttpFetcher;
use crate::engine::types::Snapshot;
use crate::progress::Progress;
use crate::runner::Runner;
use crate::store::SnapshotStore;

/// Poll laundromat machine status for a range of location codes.
#[derive(Debug, Parser)]
#[command(name = "bulk-scrape", version, about)]
#[command(group(ArgGroup::new("input").required(true).args(["start", "file", "codes"])))]
pub struct Cli {
    /// First code of an inclusive range, e.g. W000001.
    #[arg(requires = "end")]
    pub start: Option<String>,

    /// Last code of the range, e.g. W010000.
    #[arg(requires = "start")]
    pub end: Option<String>,

    /// Read codes from a file, one per line.
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Explicit list of codes.
    #[arg(long, num_args = 1.., value_name = "CODE")]
    pub codes: Vec<String>,

    /// Minutes between sweep starts.
    #[arg(long, default_value_t = DEFAULT_INTERVAL_MINUTES)]
    pub interval: u64,

    /// Maximum fetches in flight.
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT)]
    pub max_concurrent: usize,

    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    pub log_dir: PathBuf,

    /// Vendor API base URL.
    #[arg(long, env = "WASH_API_BASE", default_value = API_BASE)]
    pub api_base: String,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = FETCH_TIMEOUT.as_secs())]
    pub timeout_secs: u64,
}

impl Cli {
    pub fn into_options(self) -> Result<ScrapeOptions> {
        let codes = match (self.start, self.end, self.file) {
            (Some(start), Some(end), _) => CodeSelector::Range { start, end },
            (_, _, Some(path)) => CodeSelector::File(path),
            _ if !self.codes.is_empty() => CodeSelector::Codes(self.codes),
            _ => return Err(eyre!("give a code range, --file or --codes")),
        };

        if self.interval == 0 {
            return Err(eyre!("--interval must be at least 1 minute"));
        }
        if self.max_concurrent == 0 {
            return Err(eyre!("--max-concurrent must be at least 1"));
        }
        if self.timeout_secs == 0 {
            return Err(eyre!("--timeout-secs must be at least 1"));
        }

        let interval_secs = self
            .interval
            .checked_mul(60)
            .ok_or_else(|| eyre!("--interval of {} minutes is too large", self.interval))?;

        let mut opts = ScrapeOptions::new(codes);
        opts.interval = Duration::from_secs(interval_secs);
        opts.max_concurrent = self.max_concurrent;
        opts.fetch_timeout = Duration::from_secs(self.timeout_secs);
        opts.data_dir = self.data_dir;
        opts.log_dir = self.log_dir;
        opts.api_base = self.api_base;
        Ok(opts)
    }
}

/// Entry point for the binary: set up logging and state, then poll until
/// SIGINT/SIGTERM. Startup problems are returned as errors.
pub async fn run(cli: Cli) -> Result<()> {
    let opts = cli.into_options()?;
    crate::log::init(&opts.log_dir).wrap_err("initialising logging")?;

    let codes = opts.codes.resolve().wrap_err("resolving location codes")?;
    let store = SnapshotStore::open(&opts.data_dir).wrap_err("opening data directory")?;
    let fetcher = HttpFetcher::new(&opts.api_base, opts.fetch_timeout)?;

    tracing::info!(
        codes = codes.len(),
        first = %codes[0],
        last = %codes[codes.len() - 1],
        interval = opts.interval.as_secs() / 60,
        max_concurrent = opts.max_concurrent,
        api_base = %opts.api_base,
        "Starting bulk scraper"
    );

    let mut runner = Runner::new(&opts, codes, store, fetcher)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let mut progress = CliProgress::default();
    let summary = runner.run(cancel, Some(&mut progress)).await;
    tracing::info!(cycles = summary.cycles, "Stopped cleanly");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

/* ---------------- Progress ---------------- */

/// Logs a progress line roughly every tenth of a sweep.
#[derive(Default)]
struct CliProgress {
    total: usize,
    done: usize,
}

impl Progress for CliProgress {
    fn sweep_started(&mut self, _cycle: u64, total: usize) {
        self.total = total;
        self.done = 0;
    }

    fn item_done(&mut self, _snapshot: &Snapshot) {
        self.done += 1;
        let step = (self.total / 10).max(1);
        if self.done % step == 0 || self.done == self.total {
            tracing::info!("Progress: {}/{}", self.done, self.total);
        }
    }
}
