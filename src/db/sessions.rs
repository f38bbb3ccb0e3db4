//! Participant and study session operations
//!
//! Both are insert-only in this store. A session's summary fields are
//! written once at creation.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{is_foreign_key_violation, is_unique_violation, now_timestamp};
use crate::error::StorageError;

/// Participant row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRow {
    pub id: i64,
    pub source: String,
    pub created_at: String,
}

impl ParticipantRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            source: row.get("source")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Input for creating a participant
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateParticipantInput {
    /// Recruitment channel, e.g. "prolific" or "mturk"
    #[serde(default)]
    pub source: Option<String>,
}

/// Study session row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudySessionRow {
    pub id: i64,
    pub session_id: String,
    pub participant_id: i64,
    pub created_at: String,
    pub calibration_points: i64,
    pub font_left: String,
    pub font_right: String,
    pub time_left_ms: i64,
    pub time_right_ms: i64,
    pub time_a_ms: i64,
    pub time_b_ms: i64,
    pub font_preference: String,
    pub preferred_font_type: String,
    pub quiz_responses_json: String,
    pub user_agent: String,
    pub screen_width: i64,
    pub screen_height: i64,
}

impl StudySessionRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            participant_id: row.get("participant_id")?,
            created_at: row.get("created_at")?,
            calibration_points: row.get("calibration_points")?,
            font_left: row.get("font_left")?,
            font_right: row.get("font_right")?,
            time_left_ms: row.get("time_left_ms")?,
            time_right_ms: row.get("time_right_ms")?,
            time_a_ms: row.get("time_a_ms")?,
            time_b_ms: row.get("time_b_ms")?,
            font_preference: row.get("font_preference")?,
            preferred_font_type: row.get("preferred_font_type")?,
            quiz_responses_json: row.get("quiz_responses_json")?,
            user_agent: row.get("user_agent")?,
            screen_width: row.get("screen_width")?,
            screen_height: row.get("screen_height")?,
        })
    }
}

/// Input for creating a study session
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionInput {
    pub participant_id: i64,
    /// Generated server-side when absent or blank
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub calibration_points: i64,
    #[serde(default)]
    pub font_left: String,
    #[serde(default)]
    pub font_right: String,
    #[serde(default)]
    pub time_left_ms: i64,
    #[serde(default)]
    pub time_right_ms: i64,
    #[serde(default)]
    pub time_a_ms: i64,
    #[serde(default)]
    pub time_b_ms: i64,
    #[serde(default)]
    pub font_preference: String,
    #[serde(default)]
    pub preferred_font_type: String,
    #[serde(default)]
    pub quiz_responses_json: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub screen_width: i64,
    #[serde(default)]
    pub screen_height: i64,
}

impl CreateSessionInput {
    pub fn for_participant(participant_id: i64) -> Self {
        Self {
            participant_id,
            ..Default::default()
        }
    }
}

/// Get participant by ID
pub fn get_participant(conn: &Connection, id: i64) -> Result<Option<ParticipantRow>, StorageError> {
    conn.query_row(
        "SELECT * FROM participants WHERE id = ?",
        params![id],
        |row| ParticipantRow::from_row(row),
    )
    .optional()
    .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))
}

/// Insert a participant with an already-resolved source
pub fn create_participant(conn: &Connection, source: &str) -> Result<ParticipantRow, StorageError> {
    conn.execute(
        "INSERT INTO participants (source, created_at) VALUES (?, ?)",
        params![source, now_timestamp()],
    ).map_err(|e| StorageError::Database(format!("Insert failed: {}", e)))?;

    let id = conn.last_insert_rowid();
    info!(id, source = %source, "Created participant");

    get_participant(conn, id)?
        .ok_or_else(|| StorageError::Internal("Participant not found after insert".to_string()))
}

/// Get study session by row ID
pub fn get_session(conn: &Connection, id: i64) -> Result<Option<StudySessionRow>, StorageError> {
    conn.query_row(
        "SELECT * FROM study_sessions WHERE id = ?",
        params![id],
        |row| StudySessionRow::from_row(row),
    )
    .optional()
    .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))
}

/// Check a session row exists without loading it
pub fn session_exists(conn: &Connection, id: i64) -> Result<bool, StorageError> {
    conn.query_row(
        "SELECT 1 FROM study_sessions WHERE id = ?",
        params![id],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))
}

/// Insert a study session with an already-resolved `session_id`
pub fn create_session(
    conn: &Connection,
    session_id: &str,
    input: &CreateSessionInput,
) -> Result<StudySessionRow, StorageError> {
    if get_participant(conn, input.participant_id)?.is_none() {
        return Err(StorageError::NotFound(format!(
            "participant {} not found",
            input.participant_id
        )));
    }

    conn.execute(
        r#"
        INSERT INTO study_sessions (
            session_id, participant_id, created_at, calibration_points,
            font_left, font_right, time_left_ms, time_right_ms, time_a_ms, time_b_ms,
            font_preference, preferred_font_type, quiz_responses_json,
            user_agent, screen_width, screen_height
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            session_id,
            input.participant_id,
            now_timestamp(),
            input.calibration_points,
            input.font_left,
            input.font_right,
            input.time_left_ms,
            input.time_right_ms,
            input.time_a_ms,
            input.time_b_ms,
            input.font_preference,
            input.preferred_font_type,
            input.quiz_responses_json,
            input.user_agent,
            input.screen_width,
            input.screen_height,
        ],
    ).map_err(|e| {
        if is_unique_violation(&e) {
            StorageError::Conflict(format!("session_id '{}' already exists", session_id))
        } else if is_foreign_key_violation(&e) {
            StorageError::NotFound(format!("participant {} not found", input.participant_id))
        } else {
            StorageError::Database(format!("Insert failed: {}", e))
        }
    })?;

    let id = conn.last_insert_rowid();
    info!(id, session_id = %session_id, participant_id = input.participant_id, "Created study session");

    get_session(conn, id)?
        .ok_or_else(|| StorageError::Internal("Study session not found after insert".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StudyDb;

    #[test]
    fn test_session_links_participant() {
        let db = StudyDb::open_in_memory().unwrap();
        let participant = db.with_conn(|conn| create_participant(conn, "prolific")).unwrap();

        let input = CreateSessionInput {
            font_left: "serif".into(),
            screen_width: 1920,
            ..CreateSessionInput::for_participant(participant.id)
        };
        let session = db.with_conn(|conn| create_session(conn, "abc123", &input)).unwrap();

        assert_eq!(session.participant_id, participant.id);
        assert_eq!(session.session_id, "abc123");
        assert_eq!(session.font_left, "serif");
        assert_eq!(session.screen_width, 1920);
        assert!(db.with_conn(|conn| session_exists(conn, session.id)).unwrap());
        assert!(!db.with_conn(|conn| session_exists(conn, session.id + 1)).unwrap());
    }

    #[test]
    fn test_duplicate_session_id_conflicts() {
        let db = StudyDb::open_in_memory().unwrap();
        let participant = db.with_conn(|conn| create_participant(conn, "web")).unwrap();
        let input = CreateSessionInput::for_participant(participant.id);

        db.with_conn(|conn| create_session(conn, "dup", &input)).unwrap();
        let second = db.with_conn(|conn| create_session(conn, "dup", &input));

        assert!(matches!(second, Err(StorageError::Conflict(_))));
        assert_eq!(db.stats().unwrap().sessions, 1);
    }

    #[test]
    fn test_unknown_participant_is_not_found() {
        let db = StudyDb::open_in_memory().unwrap();
        let result = db.with_conn(|conn| create_session(conn, "s1", &CreateSessionInput::for_participant(7)));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}
