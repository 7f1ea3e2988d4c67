//! Persisted station document
//!
//! The document holds the catalog, the schedule, the current session and
//! the shared epoch. It is untrusted input: every record is validated into a
//! strict type and records that fail are dropped with a reason, while a
//! document that cannot be parsed at all loads as empty.
//!
//! Wire shape:
//!
//! ```json
//! {
//!   "songs": [{"id": "...", "title": "...", "artist": "...", "url": "",
//!              "duration": 213.4, "uploadedAt": 1704067200000, "isLiveShow": false}],
//!   "schedule": [{"date": "2024-03-10", "hour": 14, "songId": "..."}],
//!   "user": {"username": "julian", "role": "admin"},
//!   "epoch": 1704067200000
//! }
//! ```

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::catalog::Catalog;
use crate::error::Result;
use crate::schedule::{parse_date, ScheduleEntry, ScheduleTable};
use crate::track::Track;

/// Role of the logged-in user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// Persisted session record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
    pub role: Role,
}

/// Kind of record a rejection applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Track,
    ScheduleEntry,
    Session,
    Epoch,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Track => "track",
            RecordKind::ScheduleEntry => "schedule entry",
            RecordKind::Session => "session",
            RecordKind::Epoch => "epoch",
        };
        f.write_str(name)
    }
}

/// Why a persisted record was dropped
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RejectReason {
    #[error("record is not an object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` should be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field `{field}` has invalid value {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("duplicate track id {0}")]
    DuplicateId(String),
}

/// A dropped record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRejection {
    pub kind: RecordKind,
    /// Position in the stored sequence (0 for single records)
    pub index: usize,
    pub reason: RejectReason,
}

/// Outcome of a defensive load
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// The whole document was unusable and replaced by the empty one
    pub document_discarded: bool,
    pub rejected: Vec<RecordRejection>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        !self.document_discarded && self.rejected.is_empty()
    }
}

/// Station state as persisted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationDocument {
    pub tracks: Vec<Track>,
    pub schedule: Vec<ScheduleEntry>,
    pub session: Option<Session>,
    pub epoch: Option<DateTime<Utc>>,
}

/// Serialized form, field names as stored
#[derive(Serialize)]
struct StoredDocument<'a> {
    songs: &'a [Track],
    schedule: &'a [ScheduleEntry],
    user: &'a Option<Session>,
    #[serde(skip_serializing_if = "Option::is_none")]
    epoch: Option<i64>,
}

impl StationDocument {
    /// Parses a JSON text, never failing.
    pub fn from_json_str(text: &str) -> (Self, LoadReport) {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_value(value),
            Err(e) => {
                warn!(error = %e, "Station document is not valid JSON, starting empty");
                (Self::default(), discarded())
            }
        }
    }

    /// Validates an already parsed JSON value record by record.
    pub fn from_value(value: Value) -> (Self, LoadReport) {
        let Value::Object(root) = value else {
            warn!("Station document is not a JSON object, starting empty");
            return (Self::default(), discarded());
        };

        let mut report = LoadReport::default();
        let mut doc = StationDocument::default();

        let mut seen = HashSet::new();
        for (index, record) in sequence(&root, "songs", RecordKind::Track, &mut report)
            .iter()
            .enumerate()
        {
            match validate_track(record) {
                Ok(track) if !seen.insert(track.id.clone()) => {
                    report.reject(RecordKind::Track, index, RejectReason::DuplicateId(track.id))
                }
                Ok(track) => doc.tracks.push(track),
                Err(reason) => report.reject(RecordKind::Track, index, reason),
            }
        }

        for (index, record) in sequence(&root, "schedule", RecordKind::ScheduleEntry, &mut report)
            .iter()
            .enumerate()
        {
            match validate_schedule_entry(record) {
                Ok(entry) => doc.schedule.push(entry),
                Err(reason) => report.reject(RecordKind::ScheduleEntry, index, reason),
            }
        }

        match root.get("user") {
            None | Some(Value::Null) => {}
            Some(record) => match validate_session(record) {
                Ok(session) => doc.session = Some(session),
                Err(reason) => report.reject(RecordKind::Session, 0, reason),
            },
        }

        match root.get("epoch") {
            None | Some(Value::Null) => {}
            Some(value) => match validate_epoch(value) {
                Ok(epoch) => doc.epoch = Some(epoch),
                Err(reason) => report.reject(RecordKind::Epoch, 0, reason),
            },
        }

        for rejection in &report.rejected {
            warn!(
                kind = %rejection.kind,
                index = rejection.index,
                reason = %rejection.reason,
                "Rejected persisted record"
            );
        }

        (doc, report)
    }

    /// Serializes with the stored field names
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.stored())?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.stored())?)
    }

    pub fn catalog(&self) -> Catalog {
        Catalog::from_tracks(self.tracks.clone())
    }

    pub fn schedule_table(&self) -> ScheduleTable {
        ScheduleTable::from_entries(self.schedule.clone())
    }

    fn stored(&self) -> StoredDocument<'_> {
        StoredDocument {
            songs: &self.tracks,
            schedule: &self.schedule,
            user: &self.session,
            epoch: self.epoch.map(|e| e.timestamp_millis()),
        }
    }
}

impl LoadReport {
    fn reject(&mut self, kind: RecordKind, index: usize, reason: RejectReason) {
        self.rejected.push(RecordRejection {
            kind,
            index,
            reason,
        });
    }
}

fn discarded() -> LoadReport {
    LoadReport {
        document_discarded: true,
        rejected: Vec::new(),
    }
}

/// Fetches an array member; anything else than an array or absence is
/// reported and treated as empty.
fn sequence<'a>(
    root: &'a Map<String, Value>,
    key: &'static str,
    kind: RecordKind,
    report: &mut LoadReport,
) -> &'a [Value] {
    match root.get(key) {
        Some(Value::Array(items)) => items,
        None | Some(Value::Null) => &[],
        Some(_) => {
            report.reject(
                kind,
                0,
                RejectReason::WrongType {
                    field: key,
                    expected: "an array",
                },
            );
            &[]
        }
    }
}

pub fn validate_track(record: &Value) -> std::result::Result<Track, RejectReason> {
    let obj = record.as_object().ok_or(RejectReason::NotAnObject)?;

    let id = required_str(obj, "id")?;
    let title = optional_str(obj, "title")?.unwrap_or_default();
    let artist = optional_str(obj, "artist")?.unwrap_or_default();
    let url = optional_str(obj, "url")?.unwrap_or_default();

    // a missing or non-positive duration falls back at resolution time
    let duration_secs = match obj.get("duration") {
        None | Some(Value::Null) => 0.0,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(_) => {
            return Err(RejectReason::WrongType {
                field: "duration",
                expected: "a number",
            })
        }
    };

    let created_at = match obj.get("uploadedAt") {
        None | Some(Value::Null) => DateTime::<Utc>::UNIX_EPOCH,
        Some(value) => millis_to_datetime(value, "uploadedAt")?,
    };

    let is_live_show = match obj.get("isLiveShow") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => {
            return Err(RejectReason::WrongType {
                field: "isLiveShow",
                expected: "a boolean",
            })
        }
    };

    Ok(Track {
        id,
        title,
        artist,
        url,
        duration_secs,
        is_live_show,
        created_at,
    })
}

pub fn validate_schedule_entry(record: &Value) -> std::result::Result<ScheduleEntry, RejectReason> {
    let obj = record.as_object().ok_or(RejectReason::NotAnObject)?;

    let raw_date = required_str(obj, "date")?;
    let date = parse_date(&raw_date).map_err(|_| RejectReason::InvalidValue {
        field: "date",
        value: raw_date.clone(),
    })?;

    let hour = match obj.get("hour") {
        None | Some(Value::Null) => return Err(RejectReason::MissingField("hour")),
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| RejectReason::InvalidValue {
            field: "hour",
            value: n.to_string(),
        })?,
        Some(_) => {
            return Err(RejectReason::WrongType {
                field: "hour",
                expected: "an integer",
            })
        }
    };
    if hour > 23 {
        return Err(RejectReason::InvalidValue {
            field: "hour",
            value: hour.to_string(),
        });
    }

    let track_id = required_str(obj, "songId")?;

    Ok(ScheduleEntry {
        date,
        hour: hour as u8,
        track_id,
    })
}

pub fn validate_session(record: &Value) -> std::result::Result<Session, RejectReason> {
    let obj = record.as_object().ok_or(RejectReason::NotAnObject)?;
    let username = required_str(obj, "username")?;
    let role = match required_str(obj, "role")?.as_str() {
        "admin" => Role::Admin,
        "user" => Role::User,
        other => {
            return Err(RejectReason::InvalidValue {
                field: "role",
                value: other.to_string(),
            })
        }
    };
    Ok(Session { username, role })
}

pub fn validate_epoch(value: &Value) -> std::result::Result<DateTime<Utc>, RejectReason> {
    millis_to_datetime(value, "epoch")
}

fn millis_to_datetime(
    value: &Value,
    field: &'static str,
) -> std::result::Result<DateTime<Utc>, RejectReason> {
    let millis = value.as_i64().ok_or(RejectReason::WrongType {
        field,
        expected: "an integer timestamp in milliseconds",
    })?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| RejectReason::InvalidValue {
            field,
            value: millis.to_string(),
        })
}

fn required_str(
    obj: &Map<String, Value>,
    field: &'static str,
) -> std::result::Result<String, RejectReason> {
    match optional_str(obj, field)? {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(RejectReason::MissingField(field)),
    }
}

fn optional_str(
    obj: &Map<String, Value>,
    field: &'static str,
) -> std::result::Result<Option<String>, RejectReason> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(RejectReason::WrongType {
            field,
            expected: "a string",
        }),
    }
}
