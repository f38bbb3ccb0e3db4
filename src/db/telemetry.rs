//! Append-only telemetry tables
//!
//! Every row references `study_sessions.id`. There are no update or delete
//! functions here; rows are write-once.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{format_timestamp, is_foreign_key_violation};
use crate::error::StorageError;

/// The five telemetry kinds, one table each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    Calibration,
    Accuracy,
    QuizResponse,
    GazePoint,
    ReadingEvent,
}

impl TelemetryKind {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Calibration => "calibration_data",
            Self::Accuracy => "accuracy_measurements",
            Self::QuizResponse => "quiz_responses",
            Self::GazePoint => "gaze_points",
            Self::ReadingEvent => "reading_events",
        }
    }
}

impl std::fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Calibration => "calibration",
            Self::Accuracy => "accuracy",
            Self::QuizResponse => "quiz_response",
            Self::GazePoint => "gaze_point",
            Self::ReadingEvent => "reading_event",
        };
        f.write_str(name)
    }
}

/// One click on a calibration target
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationInput {
    pub session_id: i64,
    pub point_index: i64,
    pub click_number: i64,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Result of a gaze accuracy check
#[derive(Debug, Clone, Deserialize)]
pub struct AccuracyInput {
    pub session_id: i64,
    /// Percent, 0..=100
    pub accuracy: f64,
    /// Milliseconds
    pub duration: i64,
    pub passed: bool,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A participant's answer to one quiz question
#[derive(Debug, Clone, Deserialize)]
pub struct QuizResponseInput {
    pub session_id: i64,
    pub question_id: String,
    pub answer_index: i64,
    #[serde(default)]
    pub is_correct: Option<bool>,
    /// Milliseconds
    #[serde(default)]
    pub response_time: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One gaze sample
#[derive(Debug, Clone, Deserialize)]
pub struct GazePointInput {
    pub session_id: i64,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub panel: Option<String>,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Reading phase transition, e.g. `start`/`end` on a panel
#[derive(Debug, Clone, Deserialize)]
pub struct ReadingEventInput {
    pub session_id: i64,
    pub event_type: String,
    pub panel: String,
    /// Milliseconds
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

fn insert_failed(kind: TelemetryKind, session_id: i64, e: rusqlite::Error) -> StorageError {
    if is_foreign_key_violation(&e) {
        StorageError::NotFound(format!("session {} not found", session_id))
    } else {
        StorageError::Database(format!("Insert into {} failed: {}", kind.table(), e))
    }
}

fn finish(conn: &Connection, kind: TelemetryKind, session_id: i64) -> i64 {
    let id = conn.last_insert_rowid();
    debug!(id, session_id, kind = %kind, "Recorded telemetry");
    id
}

/// Insert a calibration click, stamped with `timestamp`
pub fn insert_calibration(
    conn: &Connection,
    input: &CalibrationInput,
    timestamp: DateTime<Utc>,
) -> Result<i64, StorageError> {
    let kind = TelemetryKind::Calibration;
    conn.execute(
        "INSERT INTO calibration_data (session_id, point_index, click_number, x, y, timestamp)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            input.session_id,
            input.point_index,
            input.click_number,
            input.x,
            input.y,
            format_timestamp(timestamp),
        ],
    ).map_err(|e| insert_failed(kind, input.session_id, e))?;

    Ok(finish(conn, kind, input.session_id))
}

/// Insert an accuracy measurement
pub fn insert_accuracy(
    conn: &Connection,
    input: &AccuracyInput,
    timestamp: DateTime<Utc>,
) -> Result<i64, StorageError> {
    let kind = TelemetryKind::Accuracy;
    conn.execute(
        "INSERT INTO accuracy_measurements (session_id, accuracy, duration, passed, timestamp)
         VALUES (?, ?, ?, ?, ?)",
        params![
            input.session_id,
            input.accuracy,
            input.duration,
            input.passed,
            format_timestamp(timestamp),
        ],
    ).map_err(|e| insert_failed(kind, input.session_id, e))?;

    Ok(finish(conn, kind, input.session_id))
}

/// Insert a quiz response
pub fn insert_quiz_response(
    conn: &Connection,
    input: &QuizResponseInput,
    timestamp: DateTime<Utc>,
) -> Result<i64, StorageError> {
    let kind = TelemetryKind::QuizResponse;
    conn.execute(
        "INSERT INTO quiz_responses (session_id, question_id, answer_index, is_correct, response_time, timestamp)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            input.session_id,
            input.question_id,
            input.answer_index,
            input.is_correct,
            input.response_time,
            format_timestamp(timestamp),
        ],
    ).map_err(|e| insert_failed(kind, input.session_id, e))?;

    Ok(finish(conn, kind, input.session_id))
}

/// Insert a gaze sample
pub fn insert_gaze_point(
    conn: &Connection,
    input: &GazePointInput,
    timestamp: DateTime<Utc>,
) -> Result<i64, StorageError> {
    let kind = TelemetryKind::GazePoint;
    conn.execute(
        "INSERT INTO gaze_points (session_id, x, y, panel, phase, timestamp)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            input.session_id,
            input.x,
            input.y,
            input.panel,
            input.phase,
            format_timestamp(timestamp),
        ],
    ).map_err(|e| insert_failed(kind, input.session_id, e))?;

    Ok(finish(conn, kind, input.session_id))
}

/// Insert a reading event
pub fn insert_reading_event(
    conn: &Connection,
    input: &ReadingEventInput,
    timestamp: DateTime<Utc>,
) -> Result<i64, StorageError> {
    let kind = TelemetryKind::ReadingEvent;
    conn.execute(
        "INSERT INTO reading_events (session_id, event_type, panel, duration, timestamp)
         VALUES (?, ?, ?, ?, ?)",
        params![
            input.session_id,
            input.event_type,
            input.panel,
            input.duration,
            format_timestamp(timestamp),
        ],
    ).map_err(|e| insert_failed(kind, input.session_id, e))?;

    Ok(finish(conn, kind, input.session_id))
}

/// Count rows of one kind for a session
pub fn count_for_session(
    conn: &Connection,
    kind: TelemetryKind,
    session_id: i64,
) -> Result<u64, StorageError> {
    let n: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE session_id = ?", kind.table()),
            params![session_id],
            |row| row.get(0),
        )
        .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))?;
    Ok(n as u64)
}
