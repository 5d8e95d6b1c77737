// src/config/consts.rs
use std::time::Duration;

// Net config
pub const API_BASE: &str = "https://us-central1-washmobilepay.cloudfunctions.net";
pub const LOCATION_PATH: &str = "/locations";
pub const STATUS_PATH: &str = "/get_machine_status_v1";
pub const USER_AGENT: &str = concat!("wash_scrape/", env!("CARGO_PKG_VERSION"));
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

// Local store
pub const DEFAULT_DATA_DIR: &str = "data";
pub const BLACKLIST_FILE: &str = "failed_codes.json";
pub const STATUS_FILE: &str = "status.json";
pub const AGGREGATE_FILE: &str = "parsed.csv";
pub const TMP_SUFFIX: &str = ".tmp";

// Logging
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const LOG_FILE: &str = "bulk_scraper.log";

// Cadence / concurrency
pub const DEFAULT_INTERVAL_MINUTES: u64 = 15;
pub const DEFAULT_MAX_CONCURRENT: usize = 50;
pub const DRAIN_GRACE: Duration = Duration::from_secs(10);
