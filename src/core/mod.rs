// src/core/mod.rs

pub mod code;
pub mod net;

pub use code::LocationCode;
pub use net::{Fetcher, HttpFetcher};
