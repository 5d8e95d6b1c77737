// src/store.rs
//
// Filesystem-backed state. Layout under the data root:
//
//   <code>/<code>.json    location metadata (read by the geocoder)
//   <code>/status.json    latest machine-status snapshot
//   <code>/parsed.csv     append-only machine records
//   failed_codes.json     blacklist, JSON array of codes
//
// Every whole-file write goes temp -> fsync -> rename, so a concurrent reader
// sees either the previous complete file or the new one. Leftover `.tmp`
// files are safe to delete at any time.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::consts::{AGGREGATE_FILE, BLACKLIST_FILE, STATUS_FILE, TMP_SUFFIX};
use crate::core::code::LocationCode;
use crate::csv;
use crate::error::{Result, ScrapeError};

/// Codes confirmed not to exist. Only ever grows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Blacklist {
    codes: BTreeSet<LocationCode>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the code was not already present.
    pub fn insert(&mut self, code: LocationCode) -> bool {
        self.codes.insert(code)
    }

    pub fn contains(&self, code: &LocationCode) -> bool {
        self.codes.contains(code)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocationCode> {
        self.codes.iter()
    }
}

impl FromIterator<LocationCode> for Blacklist {
    fn from_iter<I: IntoIterator<Item = LocationCode>>(iter: I) -> Self {
        Self { codes: iter.into_iter().collect() }
    }
}

pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Create the data root if needed, prove it is writable, and clear out
    /// temp files left behind by an interrupted run.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        ensure_directory(&root)?;

        let store = Self { root };
        let probe = store.root.join(join!(".write-probe", TMP_SUFFIX));
        write_atomic(&probe, b"ok")?;
        fs::remove_file(&probe).map_err(|e| ScrapeError::storage(&probe, e))?;

        let removed = store.remove_stale_temp_files()?;
        if removed > 0 {
            tracing::info!(removed, "Removed temp files from an interrupted run");
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn location_dir(&self, code: &LocationCode) -> PathBuf {
        self.root.join(code.as_str())
    }

    pub fn location_path(&self, code: &LocationCode) -> PathBuf {
        self.location_dir(code).join(join!(code.as_str(), ".json"))
    }

    pub fn snapshot_path(&self, code: &LocationCode) -> PathBuf {
        self.location_dir(code).join(STATUS_FILE)
    }

    pub fn aggregate_path(&self, code: &LocationCode) -> PathBuf {
        self.location_dir(code).join(AGGREGATE_FILE)
    }

    pub fn blacklist_path(&self) -> PathBuf {
        self.root.join(BLACKLIST_FILE)
    }

    /* ---------------- Snapshots ---------------- */

    /// Atomically replace the latest status snapshot for `code`.
    pub fn put(&self, code: &LocationCode, payload: &[u8]) -> Result<()> {
        ensure_directory(&self.location_dir(code))?;
        write_atomic(&self.snapshot_path(code), payload)
    }

    pub fn load_snapshot(&self, code: &LocationCode) -> Result<Option<Vec<u8>>> {
        read_optional(&self.snapshot_path(code))
    }

    /// Atomically replace the location metadata for `code`.
    pub fn put_location(&self, code: &LocationCode, payload: &[u8]) -> Result<()> {
        ensure_directory(&self.location_dir(code))?;
        write_atomic(&self.location_path(code), payload)
    }

    pub fn load_location(&self, code: &LocationCode) -> Result<Option<Vec<u8>>> {
        read_optional(&self.location_path(code))
    }

    /* ---------------- Blacklist ---------------- */

    /// Missing file means an empty blacklist. A file that is not a JSON
    /// array of strings is an error rather than silently dropped.
    pub fn load_blacklist(&self) -> Result<Blacklist> {
        let path = self.blacklist_path();
        let Some(bytes) = read_optional(&path)? else {
            return Ok(Blacklist::new());
        };

        let raw: Vec<String> = serde_json::from_slice(&bytes)
            .map_err(|source| ScrapeError::CorruptBlacklist { path: path.clone(), source })?;

        Ok(raw
            .iter()
            .filter_map(|r| match LocationCode::parse(r) {
                Ok(code) => Some(code),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed entry in blacklist");
                    None
                }
            })
            .collect())
    }

    /// Rewrite the whole blacklist file, sorted.
    pub fn persist_blacklist(&self, blacklist: &Blacklist) -> Result<()> {
        let codes: Vec<&LocationCode> = blacklist.iter().collect();
        let mut body = serde_json::to_vec_pretty(&codes)
            .map_err(|e| ScrapeError::storage(self.blacklist_path(), io::Error::other(e)))?;
        body.push(b'\n');
        write_atomic(&self.blacklist_path(), &body)
    }

    /* ---------------- Aggregate tables ---------------- */

    /// Whether this location's table already exists (and so has its header).
    pub fn has_succeeded_before(&self, code: &LocationCode) -> bool {
        fs::metadata(self.aggregate_path(code))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// First row of the existing table, if any. Only the header line is read.
    pub fn aggregate_header(&self, code: &LocationCode) -> Result<Option<Vec<String>>> {
        let path = self.aggregate_path(code);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ScrapeError::storage(&path, e)),
        };

        let mut line = Vec::new();
        BufReader::new(file)
            .read_until(b'\n', &mut line)
            .map_err(|e| ScrapeError::storage(&path, e))?;
        let text = String::from_utf8_lossy(&line);
        Ok(csv::parse_rows(text.trim_end_matches(['\r', '\n'])).into_iter().next())
    }

    /// Append rows to the location's table, writing `header` first when the
    /// table is new. Returns the number of rows written.
    pub fn append_records<S: AsRef<str>>(
        &self,
        code: &LocationCode,
        header: &[&str],
        rows: &[Vec<S>],
    ) -> Result<usize> {
        let path = self.aggregate_path(code);
        ensure_directory(&self.location_dir(code))?;
        let fresh = !self.has_succeeded_before(code);

        let write = || -> io::Result<()> {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let mut out = BufWriter::new(file);
            if fresh {
                csv::write_row(&mut out, header)?;
            }
            for row in rows {
                csv::write_row(&mut out, row.as_slice())?;
            }
            out.flush()
        };
        write().map_err(|e| ScrapeError::storage(&path, e))?;

        Ok(rows.len())
    }

    /* ---------------- Discovery / housekeeping ---------------- */

    /// Codes that already have location metadata on disk.
    pub fn known_locations(&self) -> Result<Vec<LocationCode>> {
        let entries = fs::read_dir(&self.root).map_err(|e| ScrapeError::storage(&self.root, e))?;

        let mut codes = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else { continue };
            let Ok(code) = LocationCode::parse(&name) else { continue };
            if code.as_str() == name && self.location_path(&code).is_file() {
                codes.push(code);
            }
        }
        codes.sort_unstable();
        Ok(codes)
    }

    /// Delete `*.tmp` files in the root and one level down.
    pub fn remove_stale_temp_files(&self) -> Result<usize> {
        let mut removed = 0;
        let mut dirs = vec![self.root.clone()];
        let top = fs::read_dir(&self.root).map_err(|e| ScrapeError::storage(&self.root, e))?;
        dirs.extend(top.flatten().map(|e| e.path()).filter(|p| p.is_dir()));

        for dir in dirs {
            let Ok(entries) = fs::read_dir(&dir) else { continue };
            for path in entries.flatten().map(|e| e.path()) {
                let is_tmp = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(TMP_SUFFIX));
                if is_tmp && path.is_file() {
                    fs::remove_file(&path).map_err(|e| ScrapeError::storage(&path, e))?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

/* ---------------- File helpers ---------------- */

pub fn ensure_directory(dir: &Path) -> Result<()> {
    if dir.exists() && !dir.is_dir() {
        return Err(ScrapeError::storage(
            dir,
            io::Error::new(io::ErrorKind::AlreadyExists, "path exists but is not a directory"),
        ));
    }
    fs::create_dir_all(dir).map_err(|e| ScrapeError::storage(dir, e))
}

/// Temp path for `path`: `.<name>.tmp` in the same directory, so the rename
/// never crosses a filesystem.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("snapshot");
    path.with_file_name(join!(".", name, TMP_SUFFIX))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = temp_path_for(path);
    let write = || -> io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };

    write().map_err(|e| {
        let _ = fs::remove_file(&tmp);
        ScrapeError::storage(path, e)
    })
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ScrapeError::storage(path, e)),
    }
}
