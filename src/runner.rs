// src/runner.rs
//
// The cycle orchestrator. Alternates between two states until cancelled:
//
//   Sweeping  fan the targets out through the scheduler and handle every
//             result as it arrives (store, parse, blacklist)
//   Idle      sleep until `sweep_start + interval`
//
// A code discovered during a sweep gets its status fetched in a follow-up pass
// of that same sweep. A sweep that overruns the interval is followed
// immediately by the next one. Sweeps never overlap.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::config::ScrapeOptions;
use crate::core::code::LocationCode;
use crate::core::net::Fetcher;
use crate::engine::scheduler::Scheduler;
use crate::engine::types::{CycleReport, Endpoint, FetchTarget, Outcome, Snapshot};
use crate::error::{Result, ScrapeError};
use crate::log::fmt_elapsed;
use crate::parse;
use crate::progress::{NullProgress, Progress};
use crate::store::{Blacklist, SnapshotStore};

/// Summary of a finished run.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub cycles: u64,
    pub last_report: Option<CycleReport>,
}

pub struct Runner<F: Fetcher> {
    codes: Vec<LocationCode>,
    interval: Duration,
    store: Arc<SnapshotStore>,
    scheduler: Scheduler<F>,
    blacklist: Blacklist,
    /// Set while the file on disk lags the in-memory blacklist.
    blacklist_dirty: bool,
    /// Discovered locations: code -> ULN.
    ulns: BTreeMap<LocationCode, String>,
    cycle: u64,
}

impl<F: Fetcher> Runner<F> {
    /// Build a runner over `codes`, restoring the blacklist and every
    /// location already discovered in `store`.
    pub fn new(opts: &ScrapeOptions, mut codes: Vec<LocationCode>, store: SnapshotStore, fetcher: F) -> Result<Self> {
        codes.sort_unstable();
        codes.dedup();

        let blacklist = store.load_blacklist()?;
        let ulns = restore_locations(&store)?;
        tracing::info!(
            codes = codes.len(),
            blacklisted = blacklist.len(),
            known = ulns.len(),
            "Restored state from {}",
            store.root().display()
        );

        let scheduler = Scheduler::new(Arc::new(fetcher), opts.max_concurrent)
            .with_fetch_timeout(opts.fetch_timeout)
            .with_drain_grace(opts.drain_grace);

        Ok(Self {
            codes,
            interval: opts.interval,
            store: Arc::new(store),
            scheduler,
            blacklist,
            blacklist_dirty: false,
            ulns,
            cycle: 0,
        })
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    pub fn uln(&self, code: &LocationCode) -> Option<&str> {
        self.ulns.get(code).map(String::as_str)
    }

    /// This sweep's work, ascending by code: blacklisted codes are skipped,
    /// known locations get a status fetch, the rest a location lookup.
    pub fn targets(&self) -> Vec<FetchTarget> {
        self.codes
            .iter()
            .filter(|code| !self.blacklist.contains(code))
            .map(|code| match self.ulns.get(code) {
                Some(uln) => FetchTarget::status(code.clone(), uln.clone()),
                None => FetchTarget::location(code.clone()),
            })
            .collect()
    }

    /* ---------------- Cadence loop ---------------- */

    /// Sweep, idle, repeat until `cancel` fires.
    pub async fn run(&mut self, cancel: CancellationToken, progress: Option<&mut dyn Progress>) -> RunSummary {
        let mut null = NullProgress;
        let progress: &mut dyn Progress = match progress {
            Some(p) => p,
            None => &mut null,
        };
        let mut summary = RunSummary::default();

        while !cancel.is_cancelled() {
            let started = Instant::now();
            let report = self.sweep(&cancel, &mut *progress).await;
            summary.cycles += 1;
            summary.last_report = Some(report);

            if cancel.is_cancelled() {
                break;
            }

            let next_wake = started + self.interval;
            let now = Instant::now();
            if now >= next_wake {
                tracing::warn!(
                    overrun = %fmt_elapsed(now - next_wake),
                    "Sweep took longer than the interval, starting next sweep now"
                );
                progress.idle(Duration::ZERO);
                continue;
            }

            let wait = next_wake - now;
            tracing::info!(wait = %fmt_elapsed(wait), "Idle until next sweep");
            progress.idle(wait);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep_until(next_wake) => {}
            }
        }

        tracing::info!(cycles = summary.cycles, "Shutting down");
        summary
    }

    /// Run one sweep to completion (or until cancelled and drained).
    pub async fn sweep_once(&mut self, cancel: &CancellationToken, progress: Option<&mut dyn Progress>) -> CycleReport {
        match progress {
            Some(p) => self.sweep(cancel, p).await,
            None => self.sweep(cancel, &mut NullProgress).await,
        }
    }

    async fn sweep(&mut self, cancel: &CancellationToken, progress: &mut dyn Progress) -> CycleReport {
        self.cycle += 1;
        let started = Instant::now();
        let targets = self.targets();
        let mut report = CycleReport::new(self.cycle);

        tracing::info!(cycle = self.cycle, targets = targets.len(), "Sweep started");
        progress.sweep_started(self.cycle, targets.len());

        let discovered = self.drain(targets, cancel, progress, &mut report).await;

        if !discovered.is_empty() && !cancel.is_cancelled() {
            tracing::info!(count = discovered.len(), "Fetching status for newly discovered locations");
            self.drain(discovered, cancel, progress, &mut report).await;
        }

        if self.blacklist_dirty {
            self.flush_blacklist(&mut report).await;
        }

        report.elapsed = started.elapsed();
        tracing::info!("{report}");
        progress.sweep_finished(&report);
        report
    }

    /// Fan `targets` out and handle every result. Returns status targets for
    /// locations discovered along the way.
    async fn drain(
        &mut self,
        targets: Vec<FetchTarget>,
        cancel: &CancellationToken,
        progress: &mut dyn Progress,
        report: &mut CycleReport,
    ) -> Vec<FetchTarget> {
        let mut discovered = Vec::new();
        let mut sweep = self.scheduler.sweep(targets, cancel.clone());
        while let Some(snapshot) = sweep.next().await {
            if let Some(next) = self.handle(&snapshot, report).await {
                discovered.push(next);
            }
            progress.item_done(&snapshot);
        }
        discovered
    }

    /* ---------------- Result handling ---------------- */

    async fn handle(&mut self, snapshot: &Snapshot, report: &mut CycleReport) -> Option<FetchTarget> {
        report.attempted += 1;
        let code = snapshot.code();
        let at = parse::format_request_time(snapshot.retrieved_at);

        match (&snapshot.target.endpoint, &snapshot.outcome) {
            (Endpoint::Location, Outcome::Success(body)) => {
                report.succeeded += 1;
                return self.discover(code, body, &at, report).await;
            }
            (Endpoint::Status { uln }, Outcome::Success(body)) => {
                report.succeeded += 1;
                let (owned, body, retrieved_at) = (code.clone(), body.clone(), snapshot.retrieved_at);
                let stored = self
                    .on_store(move |store| {
                        store.put(&owned, &body)?;
                        Ok(parse::ingest(store, &owned, &body, retrieved_at))
                    })
                    .await;
                match stored {
                    Ok(Ok(rows)) => {
                        report.records += rows;
                        tracing::info!(%code, %uln, %at, rows, "Status captured");
                    }
                    Ok(Err(e)) => {
                        count_error(&e, report);
                        tracing::warn!(%code, %uln, %at, error = %e, "Snapshot stored but not parsed");
                    }
                    Err(e) => {
                        report.storage_errors += 1;
                        tracing::error!(%code, %at, error = %e, "Failed to store snapshot");
                    }
                }
            }
            (_, Outcome::NotFound) => {
                self.ulns.remove(code);
                if self.blacklist.insert(code.clone()) {
                    report.not_found += 1;
                    self.blacklist_dirty = true;
                    tracing::info!(%code, %at, "Not found, blacklisted");
                    self.flush_blacklist(report).await;
                }
            }
            (_, Outcome::TransientError(cause)) => {
                report.transient += 1;
                tracing::warn!(%code, %at, endpoint = endpoint_name(&snapshot.target), error = %cause, "Fetch failed, retrying next sweep");
            }
        }
        None
    }

    async fn discover(
        &mut self,
        code: &LocationCode,
        body: &[u8],
        at: &str,
        report: &mut CycleReport,
    ) -> Option<FetchTarget> {
        let uln = match parse::location_uln(code, body) {
            Ok(uln) => uln,
            Err(e) => {
                report.parse_errors += 1;
                tracing::warn!(%code, %at, error = %e, "Location payload unusable");
                return None;
            }
        };

        let (owned, body) = (code.clone(), body.to_vec());
        if let Err(e) = self.on_store(move |store| store.put_location(&owned, &body)).await {
            report.storage_errors += 1;
            tracing::error!(%code, %at, error = %e, "Failed to store location metadata");
            return None;
        }

        tracing::info!(%code, %uln, %at, "Location discovered");
        report.discovered += 1;
        self.ulns.insert(code.clone(), uln.clone());
        Some(FetchTarget::status(code.clone(), uln))
    }

    /// Write the blacklist; on failure it stays dirty and is retried at the
    /// end of every sweep.
    async fn flush_blacklist(&mut self, report: &mut CycleReport) {
        let blacklist = self.blacklist.clone();
        match self.on_store(move |store| store.persist_blacklist(&blacklist)).await {
            Ok(()) => self.blacklist_dirty = false,
            Err(e) => {
                report.storage_errors += 1;
                tracing::error!(error = %e, "Failed to persist blacklist, will retry");
            }
        }
    }

    /// Run blocking filesystem work off the async workers. Calls are awaited
    /// one at a time, so the store still has a single writer.
    async fn on_store<T, W>(&self, work: W) -> Result<T>
    where
        T: Send + 'static,
        W: FnOnce(&SnapshotStore) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || work(store.as_ref()))
            .await
            .map_err(|e| ScrapeError::storage(self.store.root(), io::Error::other(e)))?
    }
}

fn count_error(e: &ScrapeError, report: &mut CycleReport) {
    match e {
        ScrapeError::Storage { .. } => report.storage_errors += 1,
        _ => report.parse_errors += 1,
    }
}

fn endpoint_name(target: &FetchTarget) -> &'static str {
    match target.endpoint {
        Endpoint::Location => "location",
        Endpoint::Status { .. } => "status",
    }
}

/// Rebuild the code -> ULN map from metadata already on disk. Unreadable
/// entries are skipped and rediscovered on the next sweep.
fn restore_locations(store: &SnapshotStore) -> Result<BTreeMap<LocationCode, String>> {
    let mut ulns = BTreeMap::new();
    for code in store.known_locations()? {
        let restored = store
            .load_location(&code)
            .and_then(|bytes| match bytes {
                Some(bytes) => parse::location_uln(&code, &bytes).map(Some),
                None => Ok(None),
            });
        match restored {
            Ok(Some(uln)) => {
                ulns.insert(code, uln);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(%code, error = %e, "Ignoring stored location metadata"),
        }
    }
    Ok(ulns)
}
