// src/parse.rs
//
// Snapshot parser: location metadata + one machine-status snapshot ->
// normalized machine records, appended to the location's table.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::core::code::LocationCode;
use crate::error::{Result, ScrapeError};
use crate::store::SnapshotStore;

/// Column order of every `parsed.csv`.
pub const COLUMNS: [&str; 15] = [
    "location_id",
    "location_name",
    "sitecode",
    "uln",
    "state_code",
    "room_id",
    "room_name",
    "id",
    "machine_number",
    "start_time",
    "time_remaining",
    "type",
    "request_time",
    "status_raw",
    "status",
];

/* ---------------- Vendor documents ---------------- */

#[derive(Debug, Deserialize)]
pub struct LocationDoc {
    pub location: LocationInfo,
    #[serde(default)]
    pub rooms: Vec<Room>,
}

#[derive(Debug, Deserialize)]
pub struct LocationInfo {
    #[serde(default)]
    pub location_id: Value,
    #[serde(default)]
    pub location_name: Value,
    #[serde(default)]
    pub sitecode: Value,
    pub uln: String,
}

#[derive(Debug, Deserialize)]
pub struct Room {
    pub room_id: Value,
    #[serde(default)]
    pub room_name: Value,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Deserialize)]
struct StatusDoc {
    #[serde(default)]
    data: BTreeMap<String, RoomStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct RoomStatus {
    #[serde(default)]
    machines: Vec<Machine>,
}

#[derive(Debug, Deserialize)]
struct Machine {
    #[serde(default)]
    machine_number: Value,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    time_remaining: Value,
    #[serde(rename = "type", default)]
    kind: Value,
    #[serde(default)]
    status: Option<String>,
}

impl LocationDoc {
    pub fn from_slice(code: &LocationCode, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ScrapeError::parse(code.as_str(), e.to_string()))
    }

    pub fn uln(&self) -> &str {
        self.location.uln.trim()
    }
}

/// ULN from a raw location document, or a parse error if it has none.
pub fn location_uln(code: &LocationCode, bytes: &[u8]) -> Result<String> {
    let doc = LocationDoc::from_slice(code, bytes)?;
    match doc.uln() {
        "" => Err(ScrapeError::parse(code.as_str(), "location has an empty uln")),
        uln => Ok(s!(uln)),
    }
}

/* ---------------- Records ---------------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachineStatus {
    Available,
    InUse,
    Error,
}

impl MachineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MachineStatus::Available => "available",
            MachineStatus::InUse => "in_use",
            MachineStatus::Error => "error",
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One machine as seen in one snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MachineRecord {
    pub location_id: String,
    pub location_name: String,
    pub sitecode: String,
    pub uln: String,
    pub state_code: String,
    pub room_id: String,
    pub room_name: String,
    pub room_key: String,
    pub machine_number: String,
    pub start_time: String,
    /// Minutes left as reported by the vendor.
    pub time_remaining: i64,
    pub machine_type: String,
    pub request_time: String,
    pub status_raw: String,
    pub status: MachineStatus,
}

impl MachineRecord {
    /// Cells in `COLUMNS` order.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.location_id.clone(),
            self.location_name.clone(),
            self.sitecode.clone(),
            self.uln.clone(),
            self.state_code.clone(),
            self.room_id.clone(),
            self.room_name.clone(),
            self.room_key.clone(),
            self.machine_number.clone(),
            self.start_time.clone(),
            self.time_remaining.to_string(),
            self.machine_type.clone(),
            self.request_time.clone(),
            self.status_raw.clone(),
            s!(self.status.as_str()),
        ]
    }
}

/// Derive availability from the vendor fields at `request_time`.
///
/// A machine whose countdown should already have run out is reported
/// available even if the vendor still shows time remaining.
pub fn compute_status(
    status_raw: Option<&str>,
    time_remaining: i64,
    start_time: Option<&str>,
    request_time: DateTime<Utc>,
) -> MachineStatus {
    if status_raw == Some("ERROR") {
        return MachineStatus::Error;
    }
    if time_remaining == 0 {
        return MachineStatus::Available;
    }
    let Some(start) = start_time.filter(|s| !s.is_empty()) else {
        return MachineStatus::Available;
    };
    let Ok(start) = DateTime::parse_from_rfc3339(start) else {
        tracing::debug!(start_time = start, "Unparseable start_time, assuming available");
        return MachineStatus::Available;
    };

    let elapsed_minutes = (request_time - start.with_timezone(&Utc)).num_seconds().div_euclid(60);
    if elapsed_minutes > time_remaining {
        MachineStatus::Available
    } else {
        MachineStatus::InUse
    }
}

/// Vendor timestamp format used in the `request_time` column.
pub fn format_request_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Turn one status snapshot into records, sorted by room then machine number.
pub fn machine_records(
    code: &LocationCode,
    location: &LocationDoc,
    status_bytes: &[u8],
    request_time: DateTime<Utc>,
) -> Result<Vec<MachineRecord>> {
    let status: StatusDoc = serde_json::from_slice(status_bytes)
        .map_err(|e| ScrapeError::parse(code.as_str(), e.to_string()))?;

    let info = &location.location;
    let uln = s!(location.uln());
    let state_code: String = uln.chars().take(2).collect();
    let request_time_str = format_request_time(request_time);

    let rooms: HashMap<String, &Room> =
        location.rooms.iter().map(|r| (scalar_text(&r.room_id), r)).collect();

    let mut records = Vec::new();
    for (room_id, room_status) in &status.data {
        let Some(room) = rooms.get(room_id) else {
            tracing::warn!(%code, room_id = %room_id, "Room missing from location metadata, skipping");
            continue;
        };

        for machine in &room_status.machines {
            let time_remaining = integer(&machine.time_remaining).ok_or_else(|| {
                ScrapeError::parse(
                    code.as_str(),
                    format!("time_remaining {} is not an integer", machine.time_remaining),
                )
            })?;

            let status = compute_status(
                machine.status.as_deref(),
                time_remaining,
                machine.start_time.as_deref(),
                request_time,
            );

            records.push(MachineRecord {
                location_id: scalar_text(&info.location_id),
                location_name: scalar_text(&info.location_name),
                sitecode: scalar_text(&info.sitecode),
                uln: uln.clone(),
                state_code: state_code.clone(),
                room_id: room_id.clone(),
                room_name: scalar_text(&room.room_name),
                room_key: scalar_text(&room.id),
                machine_number: scalar_text(&machine.machine_number),
                start_time: machine.start_time.clone().unwrap_or_default(),
                time_remaining,
                machine_type: scalar_text(&machine.kind),
                request_time: request_time_str.clone(),
                status_raw: machine.status.clone().unwrap_or_default(),
                status,
            });
        }
    }

    records.sort_by(|a, b| {
        a.room_id
            .cmp(&b.room_id)
            .then_with(|| machine_order(&a.machine_number).cmp(&machine_order(&b.machine_number)))
    });
    Ok(records)
}

/// Parse the stored snapshot for `code` and append its records to the
/// location table. Returns the number of rows appended.
pub fn ingest(
    store: &SnapshotStore,
    code: &LocationCode,
    status_bytes: &[u8],
    request_time: DateTime<Utc>,
) -> Result<usize> {
    let location_bytes = store
        .load_location(code)?
        .ok_or_else(|| ScrapeError::parse(code.as_str(), "no location metadata on disk"))?;
    let location = LocationDoc::from_slice(code, &location_bytes)?;

    let records = machine_records(code, &location, status_bytes, request_time)?;
    if records.is_empty() {
        tracing::warn!(%code, "Snapshot has no machines");
        return Ok(0);
    }

    if let Some(existing) = store.aggregate_header(code)? {
        if existing != COLUMNS {
            tracing::warn!(%code, "Existing parsed.csv has a different header, appending anyway");
        }
    }

    let rows: Vec<Vec<String>> = records.iter().map(MachineRecord::to_row).collect();
    store.append_records(code, &COLUMNS, &rows)
}

/* ---------------- Value helpers ---------------- */

/// Render a JSON scalar the way it should appear in a CSV cell.
fn scalar_text(v: &Value) -> String {
    match v {
        Value::Null => s!(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Integer from a number or a numeric string.
fn integer(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numeric machine numbers sort numerically, anything else after them.
fn machine_order(n: &str) -> (u8, u64, &str) {
    match n.parse::<u64>() {
        Ok(num) => (0, num, ""),
        Err(_) => (1, 0, n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn error_status_wins() {
        let s = compute_status(Some("ERROR"), 30, Some("2025-03-01T10:00:00Z"), at(10, 5));
        assert_eq!(s, MachineStatus::Error);
    }

    #[test]
    fn zero_remaining_is_available() {
        assert_eq!(compute_status(Some("RUNNING"), 0, Some("2025-03-01T10:00:00Z"), at(10, 5)), MachineStatus::Available);
    }

    #[test]
    fn missing_start_is_available() {
        assert_eq!(compute_status(None, 25, None, at(10, 5)), MachineStatus::Available);
        assert_eq!(compute_status(None, 25, Some(""), at(10, 5)), MachineStatus::Available);
    }

    #[test]
    fn running_cycle_is_in_use_until_countdown_lapses() {
        let start = Some("2025-03-01T10:00:00.000Z");
        assert_eq!(compute_status(None, 30, start, at(10, 10)), MachineStatus::InUse);
        assert_eq!(compute_status(None, 30, start, at(10, 30)), MachineStatus::InUse);
        assert_eq!(compute_status(None, 30, start, at(10, 31)), MachineStatus::Available);
    }

    #[test]
    fn unparseable_start_is_available() {
        assert_eq!(compute_status(None, 30, Some("yesterday"), at(10, 0)), MachineStatus::Available);
    }

    #[test]
    fn scalars_render_without_json_quoting() {
        assert_eq!(scalar_text(&Value::from(12)), "12");
        assert_eq!(scalar_text(&Value::from(" Main ")), "Main");
        assert_eq!(scalar_text(&Value::Null), "");
    }

    #[test]
    fn integers_accept_numeric_strings() {
        assert_eq!(integer(&Value::from("15")), Some(15));
        assert_eq!(integer(&Value::from(15.0)), Some(15));
        assert_eq!(integer(&Value::from("soon")), None);
        assert_eq!(integer(&Value::Null), None);
    }

    #[test]
    fn records_join_rooms_and_sort_machines() {
        let code = LocationCode::parse("W000001").unwrap();
        let location = LocationDoc::from_slice(
            &code,
            br#"{
                "location": {"location_id": 77, "location_name": "Elm St", "sitecode": "S1", "uln": " CA0042 "},
                "rooms": [{"room_id": "R1", "room_name": "Basement", "id": 9}]
            }"#,
        )
        .unwrap();
        let status = br#"{"data": {
            "R1": {"machines": [
                {"machine_number": "10", "start_time": "2025-03-01T09:50:00Z", "time_remaining": 40, "type": "dryer", "status": "RUNNING"},
                {"machine_number": "2", "start_time": null, "time_remaining": "0", "type": "washer", "status": "AVAILABLE"}
            ]},
            "R9": {"machines": [{"machine_number": "1", "time_remaining": 0}]}
        }}"#;

        let records = machine_records(&code, &location, status, at(10, 0)).unwrap();
        assert_eq!(records.len(), 2, "unknown room R9 is skipped");

        let first = &records[0];
        assert_eq!(first.machine_number, "2");
        assert_eq!(first.status, MachineStatus::Available);
        assert_eq!(first.uln, "CA0042");
        assert_eq!(first.state_code, "CA");
        assert_eq!(first.location_id, "77");
        assert_eq!(first.room_name, "Basement");
        assert_eq!(first.room_key, "9");

        let second = &records[1];
        assert_eq!(second.machine_number, "10");
        assert_eq!(second.status, MachineStatus::InUse);
        assert_eq!(second.request_time, "2025-03-01T10:00:00.000Z");
        assert_eq!(second.to_row().len(), COLUMNS.len());
    }

    #[test]
    fn non_integer_time_remaining_is_a_parse_error() {
        let code = LocationCode::parse("W000001").unwrap();
        let location = LocationDoc::from_slice(
            &code,
            br#"{"location": {"uln": "CA1"}, "rooms": [{"room_id": "R1"}]}"#,
        )
        .unwrap();
        let status = br#"{"data": {"R1": {"machines": [{"machine_number": 1, "time_remaining": "soon"}]}}}"#;

        let err = machine_records(&code, &location, status, at(10, 0)).unwrap_err();
        assert!(matches!(err, ScrapeError::Parse { .. }));
    }

    #[test]
    fn uln_is_required() {
        let code = LocationCode::parse("W000001").unwrap();
        assert_eq!(location_uln(&code, br#"{"location": {"uln": " TX9 "}}"#).unwrap(), "TX9");
        assert!(location_uln(&code, br#"{"location": {"uln": "  "}}"#).is_err());
        assert!(location_uln(&code, br#"{"location": null}"#).is_err());
        assert!(location_uln(&code, br#"{"rooms": []}"#).is_err());
    }
}
