//! SQLite database module for study content and telemetry
//!
//! One connection behind a mutex, shared by every service. The mutex is the
//! only serialization point for request handlers; multi-statement writes
//! additionally run inside `BEGIN IMMEDIATE` transactions.
//!
//! ## Tables
//!
//! - `study_texts` - Content versions (single active row)
//! - `passages` - Ordered reading passages per version
//! - `quiz_questions` - Ordered comprehension questions per version
//! - `participants`, `study_sessions` - Session registry
//! - `calibration_data`, `accuracy_measurements`, `quiz_responses`,
//!   `gaze_points`, `reading_events` - Append-only telemetry

pub mod schema;
pub mod study_texts;
pub mod passages;
pub mod quiz_questions;
pub mod sessions;
pub mod telemetry;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{ffi, Connection, ErrorCode};
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use crate::error::StorageError;

/// SQLite database for the study store
pub struct StudyDb {
    conn: Mutex<Connection>,
}

impl StudyDb {
    /// Open or create the study database at `db_path`
    pub fn open(db_path: &Path) -> Result<Self, StorageError> {
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(db_path)
            .map_err(|e| StorageError::Database(format!("Failed to open SQLite: {}", e)))?;

        // WAL for concurrent readers from external tooling
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| StorageError::Database(format!("Failed to set PRAGMA: {}", e)))?;

        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Database(format!("Failed to open in-memory SQLite: {}", e)))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| StorageError::Database(format!("Failed to enable foreign keys: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;

        schema::init_schema(&conn)?;

        Ok(())
    }

    /// Run a read with shared access to the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let conn = self.conn.lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access (for transactions)
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, StorageError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, StorageError> {
                let n: i64 = conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                    .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                study_texts: count("study_texts")?,
                passages: count("passages")?,
                quiz_questions: count("quiz_questions")?,
                participants: count("participants")?,
                sessions: count("study_sessions")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub study_texts: u64,
    pub passages: u64,
    pub quiz_questions: u64,
    pub participants: u64,
    pub sessions: u64,
}

/// Outcome of an idempotent create
#[derive(Debug, Clone, serde::Serialize)]
pub struct CreateOutcome<T> {
    #[serde(flatten)]
    pub row: T,
    /// False when an existing row absorbed the create
    pub created: bool,
}

/// Current time in the stored timestamp format
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// RFC 3339, UTC, millisecond precision - sorts lexically
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// True when a statement failed on a UNIQUE constraint
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// True when a statement failed on a FOREIGN KEY constraint
pub fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

/// Deserialize a field that is present in the body (possibly `null`) as `Some`
///
/// Used with `#[serde(default)]` on `Option<Option<T>>` patch fields so that
/// an absent key stays `None` while `"title": null` becomes `Some(None)`.
pub fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// Re-exports
pub use study_texts::{StudyTextRow, CreateStudyTextInput, StudyTextPatch};
pub use passages::{PassageRow, CreatePassageInput, PassagePatch};
pub use quiz_questions::{QuizQuestionRow, CreateQuizQuestionInput, QuizQuestionPatch};
pub use sessions::{ParticipantRow, StudySessionRow, CreateParticipantInput, CreateSessionInput};

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_in_memory_creates_schema() {
        let db = StudyDb::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.study_texts, 0);
        assert_eq!(stats.sessions, 0);
    }

    #[test]
    fn test_reopen_on_disk_keeps_rows() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("study.db");

        {
            let db = StudyDb::open(&path).unwrap();
            db.with_conn(|conn| sessions::create_participant(conn, "lab")).unwrap();
        }

        let db = StudyDb::open(&path).unwrap();
        assert_eq!(db.stats().unwrap().participants, 1);
    }

    #[test]
    fn test_timestamp_format_sorts() {
        let a = format_timestamp(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
        let b = format_timestamp(DateTime::from_timestamp(1_700_000_000, 5_000_000).unwrap());
        assert_eq!(a, "2023-11-14T22:13:20.000Z");
        assert!(a < b);
    }

    #[test]
    fn test_present_distinguishes_null_from_absent() {
        #[derive(Deserialize)]
        struct Patch {
            #[serde(default, deserialize_with = "present")]
            title: Option<Option<String>>,
        }

        let absent: Patch = serde_json::from_str("{}").unwrap();
        let null: Patch = serde_json::from_str(r#"{"title": null}"#).unwrap();
        let empty: Patch = serde_json::from_str(r#"{"title": ""}"#).unwrap();

        assert_eq!(absent.title, None);
        assert_eq!(null.title, Some(None));
        assert_eq!(empty.title, Some(Some(String::new())));
    }
}
