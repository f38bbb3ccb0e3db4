//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::StorageError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(StorageError::Database(format!(
            "Database schema v{} is newer than this build (v{})",
            current_version, SCHEMA_VERSION
        )));
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, StorageError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    ).map_err(|e| StorageError::Database(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StorageError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| StorageError::Database(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| StorageError::Database(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(CONTENT_SCHEMA)
        .map_err(|e| StorageError::Database(format!("Failed to create content tables: {}", e)))?;

    conn.execute_batch(SESSION_SCHEMA)
        .map_err(|e| StorageError::Database(format!("Failed to create session tables: {}", e)))?;

    conn.execute_batch(TELEMETRY_SCHEMA)
        .map_err(|e| StorageError::Database(format!("Failed to create telemetry tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| StorageError::Database(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), StorageError> {
    info!(from_version, "No migration steps registered, re-applying table definitions");
    create_tables(conn)?;
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Study content: versions, passages, questions
const CONTENT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS study_texts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version TEXT NOT NULL UNIQUE,

    -- Legacy single-body content, superseded by passages
    content TEXT NOT NULL DEFAULT '',

    font_left TEXT NOT NULL DEFAULT 'serif',
    font_right TEXT NOT NULL DEFAULT 'sans',
    active INTEGER NOT NULL DEFAULT 0,

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS passages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    study_text_id INTEGER NOT NULL,
    order_index INTEGER NOT NULL DEFAULT 0,
    content TEXT NOT NULL,
    title TEXT,

    -- NULL falls back to the parent study text's fonts
    font_left TEXT,
    font_right TEXT,

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (study_text_id) REFERENCES study_texts(id)
);

CREATE TABLE IF NOT EXISTS quiz_questions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    study_text_id INTEGER NOT NULL,
    question_id TEXT NOT NULL,
    prompt TEXT NOT NULL,

    -- JSON array of choice strings
    choices_json TEXT NOT NULL,
    answer INTEGER NOT NULL,
    order_index INTEGER NOT NULL DEFAULT 0,

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (study_text_id) REFERENCES study_texts(id)
);
"#;

/// Participants and their study sessions
const SESSION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS participants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL DEFAULT 'web',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS study_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL UNIQUE,
    participant_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,

    -- Legacy calibration count, superseded by calibration_data rows
    calibration_points INTEGER NOT NULL DEFAULT 0,

    font_left TEXT NOT NULL DEFAULT '',
    font_right TEXT NOT NULL DEFAULT '',
    time_left_ms INTEGER NOT NULL DEFAULT 0,
    time_right_ms INTEGER NOT NULL DEFAULT 0,
    time_a_ms INTEGER NOT NULL DEFAULT 0,
    time_b_ms INTEGER NOT NULL DEFAULT 0,
    font_preference TEXT NOT NULL DEFAULT '',
    preferred_font_type TEXT NOT NULL DEFAULT '',

    -- Legacy JSON array of {question_id, answer}, superseded by quiz_responses
    quiz_responses_json TEXT NOT NULL DEFAULT '',

    user_agent TEXT NOT NULL DEFAULT '',
    screen_width INTEGER NOT NULL DEFAULT 0,
    screen_height INTEGER NOT NULL DEFAULT 0,

    FOREIGN KEY (participant_id) REFERENCES participants(id)
);
"#;

/// Append-only telemetry, one table per event kind
const TELEMETRY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS calibration_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL,
    point_index INTEGER NOT NULL,
    click_number INTEGER NOT NULL,
    x REAL NOT NULL,
    y REAL NOT NULL,
    timestamp TEXT NOT NULL,
    FOREIGN KEY (session_id) REFERENCES study_sessions(id)
);

CREATE TABLE IF NOT EXISTS accuracy_measurements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL,
    accuracy REAL NOT NULL,
    duration INTEGER NOT NULL,
    passed INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    FOREIGN KEY (session_id) REFERENCES study_sessions(id)
);

CREATE TABLE IF NOT EXISTS quiz_responses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL,
    question_id TEXT NOT NULL,
    answer_index INTEGER NOT NULL,
    is_correct INTEGER,
    response_time INTEGER,
    timestamp TEXT NOT NULL,
    FOREIGN KEY (session_id) REFERENCES study_sessions(id)
);

CREATE TABLE IF NOT EXISTS gaze_points (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL,
    x REAL NOT NULL,
    y REAL NOT NULL,
    panel TEXT,
    phase TEXT,
    timestamp TEXT NOT NULL,
    FOREIGN KEY (session_id) REFERENCES study_sessions(id)
);

CREATE TABLE IF NOT EXISTS reading_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    panel TEXT NOT NULL,
    duration INTEGER,
    timestamp TEXT NOT NULL,
    FOREIGN KEY (session_id) REFERENCES study_sessions(id)
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_study_texts_active ON study_texts(active);
CREATE INDEX IF NOT EXISTS idx_passages_order ON passages(study_text_id, order_index);
CREATE INDEX IF NOT EXISTS idx_quiz_questions_order ON quiz_questions(study_text_id, order_index);

CREATE INDEX IF NOT EXISTS idx_participants_source ON participants(source);
CREATE INDEX IF NOT EXISTS idx_study_sessions_participant ON study_sessions(participant_id);

CREATE INDEX IF NOT EXISTS idx_calibration_session ON calibration_data(session_id);
CREATE INDEX IF NOT EXISTS idx_accuracy_session ON accuracy_measurements(session_id);
CREATE INDEX IF NOT EXISTS idx_quiz_responses_session ON quiz_responses(session_id);
CREATE INDEX IF NOT EXISTS idx_gaze_points_session ON gaze_points(session_id);
CREATE INDEX IF NOT EXISTS idx_reading_events_session ON reading_events(session_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_all_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        for table in [
            "study_texts", "passages", "quiz_questions",
            "participants", "study_sessions",
            "calibration_data", "accuracy_measurements", "quiz_responses",
            "gaze_points", "reading_events",
        ] {
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "missing table {}", table);
        }
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();

        assert!(matches!(init_schema(&conn), Err(StorageError::Database(_))));
    }
}
