// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::HashMap;
use std::future::pending;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use wash_scrape::config::{CodeSelector, ScrapeOptions};
use wash_scrape::{join, s};
use wash_scrape::core::{Fetcher, LocationCode};
use wash_scrape::engine::{Endpoint, FetchError, FetchTarget, Outcome};

pub fn code(raw: &str) -> LocationCode {
    LocationCode::parse(raw).unwrap()
}

pub fn codes(raw: &[&str]) -> Vec<LocationCode> {
    raw.iter().map(|r| code(r)).collect()
}

/// Options tuned for tests: short timeouts, tiny interval.
pub fn test_options(data_dir: &std::path::Path) -> ScrapeOptions {
    let mut opts = ScrapeOptions::new(CodeSelector::Codes(Vec::new()));
    opts.data_dir = data_dir.to_path_buf();
    opts.interval = Duration::from_millis(50);
    opts.max_concurrent = 4;
    opts.fetch_timeout = Duration::from_secs(2);
    opts.drain_grace = Duration::from_millis(200);
    opts
}

/* ---------------- Fixtures ---------------- */

pub fn uln_for(code: &LocationCode) -> String {
    join!("MI", code.as_str())
}

pub fn location_json(uln: &str) -> Vec<u8> {
    json!({
        "location": {
            "location_id": 77,
            "location_name": "Main St Laundry",
            "sitecode": "S-77",
            "uln": uln,
        },
        "rooms": [
            { "room_id": "R1", "room_name": "Basement", "id": 9 }
        ]
    })
    .to_string()
    .into_bytes()
}

/// An idle washer, and a dryer started on 2020-01-01 with 30 minutes left,
/// which has long since finished.
pub fn status_json() -> Vec<u8> {
    json!({
        "data": {
            "R1": {
                "machines": [
                    { "machine_number": "1", "start_time": null, "time_remaining": 0, "type": "washer", "status": "AVAILABLE" },
                    { "machine_number": "2", "start_time": "2020-01-01T00:00:00Z", "time_remaining": 30, "type": "dryer", "status": "IN_USE" }
                ]
            }
        }
    })
    .to_string()
    .into_bytes()
}

/* ---------------- Mock fetcher ---------------- */

#[derive(Clone, Debug)]
pub enum Script {
    Respond(Outcome),
    Hang,
    Panic,
}

impl Script {
    pub fn transient() -> Self {
        Script::Respond(Outcome::TransientError(FetchError::Status(503)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Location,
    Status,
}

fn kind_of(target: &FetchTarget) -> Kind {
    match target.endpoint {
        Endpoint::Location => Kind::Location,
        Endpoint::Status { .. } => Kind::Status,
    }
}

#[derive(Default)]
struct Inner {
    scripts: Mutex<HashMap<(String, Kind), Script>>,
    calls: Mutex<Vec<FetchTarget>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay: Mutex<Duration>,
}

/// Scripted fetcher. Unscripted location lookups succeed with a location
/// document, unscripted status fetches with `status_json()`.
#[derive(Clone, Default)]
pub struct MockFetcher {
    inner: Arc<Inner>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.inner.delay.lock().unwrap() = delay;
        self
    }

    pub fn script(&self, code: &str, kind: Kind, script: Script) -> &Self {
        self.inner.scripts.lock().unwrap().insert((s!(code), kind), script);
        self
    }

    pub fn calls(&self) -> Vec<FetchTarget> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, code: &str) -> usize {
        self.calls().iter().filter(|t| t.code.as_str() == code).count()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    fn script_for(&self, target: &FetchTarget) -> Script {
        let key = (s!(target.code.as_str()), kind_of(target));
        if let Some(script) = self.inner.scripts.lock().unwrap().get(&key) {
            return script.clone();
        }
        match target.endpoint {
            Endpoint::Location => Script::Respond(Outcome::Success(location_json(&uln_for(&target.code)))),
            Endpoint::Status { .. } => Script::Respond(Outcome::Success(status_json())),
        }
    }
}

/// Decrements the in-flight counter even when the fetch is aborted.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, target: &FetchTarget) -> Outcome {
        self.inner.calls.lock().unwrap().push(target.clone());
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.inner.in_flight);

        let delay = *self.inner.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.script_for(target) {
            Script::Respond(outcome) => outcome,
            Script::Hang => pending().await,
            Script::Panic => panic!("scripted fetch panic for {}", target.code),
        }
    }
}
