// src/engine/scheduler.rs
//
// Bounded fan-out over a sweep's fetch targets.
//
// One coordinating task owns the queue and the JoinSet of in-flight fetches.
// It tops the set up to `max_concurrent`, waits for whichever fetch finishes
// first, forwards that result down the channel and admits the next target.
// Nothing else touches the queue or the count, so the cap holds by
// construction.

use std::future::pending;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{FutureExt, Stream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;

use crate::config::consts::{DRAIN_GRACE, FETCH_TIMEOUT};
use crate::core::net::Fetcher;
use crate::engine::types::{FetchError, FetchTarget, Outcome, Snapshot};

pub struct Scheduler<F: Fetcher> {
    fetcher: Arc<F>,
    max_concurrent: usize,
    fetch_timeout: Duration,
    drain_grace: Duration,
}

impl<F: Fetcher> Scheduler<F> {
    pub fn new(fetcher: Arc<F>, max_concurrent: usize) -> Self {
        Self {
            fetcher,
            max_concurrent: max_concurrent.max(1),
            fetch_timeout: FETCH_TIMEOUT,
            drain_grace: DRAIN_GRACE,
        }
    }

    /// Upper bound on one fetch, enforced here regardless of the fetcher.
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// How long in-flight fetches may finish after cancellation.
    pub fn with_drain_grace(mut self, drain_grace: Duration) -> Self {
        self.drain_grace = drain_grace;
        self
    }

    /// Start a sweep. Targets are admitted in the order given; results
    /// arrive in completion order, one per admitted target.
    ///
    /// Must be called from within a tokio runtime.
    pub fn sweep(&self, targets: Vec<FetchTarget>, cancel: CancellationToken) -> Sweep {
        let (tx, rx) = mpsc::channel(self.max_concurrent);
        let coordinator = Coordinator {
            fetcher: Arc::clone(&self.fetcher),
            limit: self.max_concurrent,
            fetch_timeout: self.fetch_timeout,
            drain_grace: self.drain_grace,
        };
        let handle = tokio::spawn(coordinator.run(targets, tx, cancel));
        Sweep { rx, handle }
    }
}

/// Lazy, finite stream of one sweep's results.
///
/// Dropping it early aborts whatever is still in flight.
pub struct Sweep {
    rx: mpsc::Receiver<Snapshot>,
    handle: JoinHandle<()>,
}

impl Stream for Sweep {
    type Item = Snapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Snapshot>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Sweep {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Coordinator<F: Fetcher> {
    fetcher: Arc<F>,
    limit: usize,
    fetch_timeout: Duration,
    drain_grace: Duration,
}

impl<F: Fetcher> Coordinator<F> {
    async fn run(self, targets: Vec<FetchTarget>, tx: mpsc::Sender<Snapshot>, cancel: CancellationToken) {
        let total = targets.len();
        let mut queue = targets.into_iter();
        let mut in_flight: JoinSet<Snapshot> = JoinSet::new();
        let mut admitting = true;
        let mut drain_deadline: Option<Instant> = None;

        loop {
            while admitting && in_flight.len() < self.limit {
                let Some(target) = queue.next() else {
                    admitting = false;
                    break;
                };
                in_flight.spawn(fetch_one(Arc::clone(&self.fetcher), self.fetch_timeout, target));
            }

            if in_flight.is_empty() {
                break;
            }

            let deadline = drain_deadline;
            let grace = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                _ = cancel.cancelled(), if drain_deadline.is_none() => {
                    let skipped = queue.len();
                    admitting = false;
                    drain_deadline = Some(Instant::now() + self.drain_grace);
                    tracing::info!(
                        in_flight = in_flight.len(),
                        skipped,
                        "Sweep cancelled, draining in-flight fetches"
                    );
                }

                _ = grace => {
                    tracing::warn!(abandoned = in_flight.len(), "Drain grace expired, abandoning fetches");
                    in_flight.abort_all();
                    break;
                }

                joined = in_flight.join_next() => {
                    let Some(joined) = joined else { break };
                    let snapshot = match joined {
                        Ok(snapshot) => snapshot,
                        // fetch_one never panics and nothing else aborts tasks
                        Err(e) => {
                            tracing::error!(error = %e, "Fetch task failed to join");
                            continue;
                        }
                    };
                    if tx.send(snapshot).await.is_err() {
                        tracing::debug!("Sweep consumer went away, aborting in-flight fetches");
                        in_flight.abort_all();
                        break;
                    }
                }
            }
        }

        tracing::debug!(total, "Sweep coordinator finished");
    }
}

/// One fetch, bounded by `limit`, with panics folded into a transient error
/// so every admitted target yields exactly one result.
async fn fetch_one<F: Fetcher>(fetcher: Arc<F>, limit: Duration, target: FetchTarget) -> Snapshot {
    let attempt = AssertUnwindSafe(fetcher.fetch(&target)).catch_unwind();
    let outcome = match timeout(limit, attempt).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => Outcome::TransientError(FetchError::Panicked),
        Err(_) => Outcome::TransientError(FetchError::Timeout(limit)),
    };
    Snapshot::new(target, outcome)
}
