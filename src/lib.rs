// src/lib.rs

#[macro_use]
pub mod macros;

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod core;
pub mod csv;
pub mod engine;
pub mod error;
pub mod log;
pub mod parse;
pub mod progress;
pub mod runner;
pub mod store;

pub use error::{Result, ScrapeError};
