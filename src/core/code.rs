// src/core/code.rs
//
// Location codes: an upper-case alphabetic prefix followed by a zero-padded
// number, e.g. "W000123". Ordering is plain string ordering, which matches
// numeric ordering for codes generated from one range (same prefix, same width).

use std::{fmt, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrapeError};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationCode(String);

impl LocationCode {
    /// Validate and normalize (upper-case, trimmed).
    pub fn parse(raw: &str) -> Result<Self> {
        let code = raw.trim().to_ascii_uppercase();
        split(&code).ok_or_else(|| ScrapeError::InvalidCode(s!(raw)))?;
        Ok(LocationCode(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix and numeric part. Always `Some` for a parsed code.
    pub fn parts(&self) -> (&str, u64) {
        split(&self.0).unwrap_or(("", 0))
    }

    /// Every code from `start` to `end` inclusive, ascending.
    /// Generated codes keep the digit width of `start`.
    pub fn range(start: &LocationCode, end: &LocationCode) -> Result<Vec<LocationCode>> {
        let (prefix, lo) = start.parts();
        let (end_prefix, hi) = end.parts();

        if prefix != end_prefix {
            return Err(ScrapeError::InvalidRange(format!(
                "codes must share a prefix ({prefix} vs {end_prefix})"
            )));
        }
        if lo > hi {
            return Err(ScrapeError::InvalidRange(format!(
                "start {start} is after end {end}"
            )));
        }

        let width = start.0.len() - prefix.len();
        Ok((lo..=hi)
            .map(|n| LocationCode(format!("{prefix}{n:0width$}")))
            .collect())
    }
}

impl fmt::Display for LocationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LocationCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn split(code: &str) -> Option<(&str, u64)> {
    let digits_at = code.find(|c: char| c.is_ascii_digit())?;
    let (prefix, digits) = code.split_at(digits_at);
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_uppercase()) {
        return None;
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((prefix, digits.parse().ok()?))
}

/* ---------------- Code lists ---------------- */

/// Validate a list of raw codes. Bad entries are logged and skipped.
pub fn parse_codes<S: AsRef<str>>(raw: &[S]) -> Vec<LocationCode> {
    raw.iter()
        .filter_map(|r| match LocationCode::parse(r.as_ref()) {
            Ok(code) => Some(code),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping location code");
                None
            }
        })
        .collect()
}

/// Read codes from a text file, one per line. Blank lines and `#` comments
/// are skipped; malformed lines are logged with their line number.
pub fn load_codes_file(path: &Path) -> Result<Vec<LocationCode>> {
    let text = fs::read_to_string(path).map_err(|e| ScrapeError::storage(path, e))?;

    let mut codes = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match LocationCode::parse(line) {
            Ok(code) => codes.push(code),
            Err(e) => tracing::warn!(line = n + 1, error = %e, "Skipping line in codes file"),
        }
    }

    tracing::info!(count = codes.len(), path = %path.display(), "Loaded location codes");
    Ok(codes)
}
