//! Telemetry service - append-only ingestion keyed to a study session
//!
//! Each `record_*` validates the payload, checks the session exists, stamps
//! arrival time when the client sent none, then inserts. Nothing here
//! updates or deletes a telemetry row.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::db::telemetry::{
    self, AccuracyInput, CalibrationInput, GazePointInput, QuizResponseInput, ReadingEventInput,
    TelemetryKind,
};
use crate::db::{sessions, StudyDb};
use crate::error::StorageError;

use super::events::{EventBus, StudyEvent};

pub struct TelemetryService {
    db: Arc<StudyDb>,
    events: Arc<EventBus>,
}

impl TelemetryService {
    pub fn new(db: Arc<StudyDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    pub fn record_calibration(&self, input: CalibrationInput) -> Result<i64, StorageError> {
        require_finite("x", input.x)?;
        require_finite("y", input.y)?;
        require_non_negative("point_index", input.point_index)?;
        require_non_negative("click_number", input.click_number)?;

        self.record(TelemetryKind::Calibration, input.session_id, input.timestamp, |conn, ts| {
            telemetry::insert_calibration(conn, &input, ts)
        })
    }

    pub fn record_accuracy(&self, input: AccuracyInput) -> Result<i64, StorageError> {
        if !input.accuracy.is_finite() || !(0.0..=100.0).contains(&input.accuracy) {
            return Err(StorageError::InvalidInput(format!(
                "accuracy must be between 0 and 100, got {}",
                input.accuracy
            )));
        }
        require_non_negative("duration", input.duration)?;

        self.record(TelemetryKind::Accuracy, input.session_id, input.timestamp, |conn, ts| {
            telemetry::insert_accuracy(conn, &input, ts)
        })
    }

    pub fn record_quiz_response(&self, input: QuizResponseInput) -> Result<i64, StorageError> {
        require_text("question_id", &input.question_id)?;
        require_non_negative("answer_index", input.answer_index)?;
        if let Some(ms) = input.response_time {
            require_non_negative("response_time", ms)?;
        }

        self.record(TelemetryKind::QuizResponse, input.session_id, input.timestamp, |conn, ts| {
            telemetry::insert_quiz_response(conn, &input, ts)
        })
    }

    pub fn record_gaze_point(&self, input: GazePointInput) -> Result<i64, StorageError> {
        require_finite("x", input.x)?;
        require_finite("y", input.y)?;

        self.record(TelemetryKind::GazePoint, input.session_id, input.timestamp, |conn, ts| {
            telemetry::insert_gaze_point(conn, &input, ts)
        })
    }

    pub fn record_reading_event(&self, input: ReadingEventInput) -> Result<i64, StorageError> {
        require_text("event_type", &input.event_type)?;
        require_text("panel", &input.panel)?;
        if let Some(ms) = input.duration {
            require_non_negative("duration", ms)?;
        }

        self.record(TelemetryKind::ReadingEvent, input.session_id, input.timestamp, |conn, ts| {
            telemetry::insert_reading_event(conn, &input, ts)
        })
    }

    /// Row count of one kind for a session
    pub fn count(&self, kind: TelemetryKind, session_id: i64) -> Result<u64, StorageError> {
        self.db.with_conn(|conn| telemetry::count_for_session(conn, kind, session_id))
    }

    fn record<F>(
        &self,
        kind: TelemetryKind,
        session_id: i64,
        timestamp: Option<DateTime<Utc>>,
        insert: F,
    ) -> Result<i64, StorageError>
    where
        F: FnOnce(&Connection, DateTime<Utc>) -> Result<i64, StorageError>,
    {
        if session_id <= 0 {
            return Err(StorageError::InvalidInput("session_id is required".into()));
        }
        let id = self.db.with_conn(|conn| {
            if !sessions::session_exists(conn, session_id)? {
                return Err(StorageError::NotFound(format!("session {} not found", session_id)));
            }
            // Stamped under the connection lock so row order and time order agree
            insert(conn, timestamp.unwrap_or_else(Utc::now))
        })?;

        self.events.emit(StudyEvent::TelemetryRecorded { kind, id, session_id });

        Ok(id)
    }
}

fn require_text(field: &str, value: &str) -> Result<(), StorageError> {
    if value.trim().is_empty() {
        return Err(StorageError::InvalidInput(format!("{} is required", field)));
    }
    Ok(())
}

fn require_finite(field: &str, value: f64) -> Result<(), StorageError> {
    if !value.is_finite() {
        return Err(StorageError::InvalidInput(format!("{} must be a finite number", field)));
    }
    Ok(())
}

fn require_non_negative(field: &str, value: i64) -> Result<(), StorageError> {
    if value < 0 {
        return Err(StorageError::InvalidInput(format!("{} must be >= 0, got {}", field, value)));
    }
    Ok(())
}
