// src/core/net.rs
//
// One HTTP GET per call against the vendor API. No retries and no disk I/O:
// the next scheduled sweep is the retry, and persistence belongs to the store.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::config::consts::{LOCATION_PATH, STATUS_PATH, USER_AGENT};
use crate::engine::types::{Endpoint, FetchError, FetchTarget, Outcome};
use crate::error::Result;

/// Anything that can turn a fetch target into an outcome.
///
/// The scheduler only ever talks to this trait, so sweeps can run against
/// canned outcomes in tests.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, target: &FetchTarget) -> Outcome;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    base: String,
    timeout: Duration,
}

impl HttpFetcher {
    /// Build a client whose every request is bounded by `timeout`.
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base: api_base.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn request(&self, target: &FetchTarget) -> reqwest::RequestBuilder {
        match &target.endpoint {
            Endpoint::Location => self
                .client
                .get(join!(&self.base, LOCATION_PATH))
                .query(&[("srcode", target.code.as_str())]),
            Endpoint::Status { uln } => self
                .client
                .get(join!(&self.base, STATUS_PATH))
                .query(&[("uln", uln.as_str())]),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, target: &FetchTarget) -> Outcome {
        let resp = match self.request(target).send().await {
            Ok(resp) => resp,
            Err(e) => return Outcome::TransientError(self.transport_error(e)),
        };

        let status = resp.status();
        if status != StatusCode::OK {
            // Body is irrelevant for anything but 200.
            return classify(status, &[]);
        }

        match resp.bytes().await {
            Ok(body) => classify(status, &body),
            Err(e) => Outcome::TransientError(self.transport_error(e)),
        }
    }
}

impl HttpFetcher {
    fn transport_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Map an HTTP status plus body onto an outcome.
///
/// 200 needs a JSON body to count as a success; 404 is the vendor's
/// "no such location"; everything else is transient.
pub fn classify(status: StatusCode, body: &[u8]) -> Outcome {
    match status {
        StatusCode::OK => match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(_) => Outcome::Success(body.to_vec()),
            Err(e) => Outcome::TransientError(FetchError::Body(e.to_string())),
        },
        StatusCode::NOT_FOUND => Outcome::NotFound,
        other => Outcome::TransientError(FetchError::Status(other.as_u16())),
    }
}
