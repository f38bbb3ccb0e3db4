//! Study text (content version) CRUD operations
//!
//! A study text is one version of the served content. At most one row has
//! `active = 1`; every write that turns activation on clears the flag on all
//! other rows inside the same immediate transaction.

use rusqlite::{params, Connection, OptionalExtension, Row, ToSql, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{is_unique_violation, now_timestamp, CreateOutcome};
use crate::error::StorageError;

/// Study text row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyTextRow {
    pub id: i64,
    pub version: String,
    /// Legacy single-passage body, empty when passages are used
    pub content: String,
    pub font_left: String,
    pub font_right: String,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl StudyTextRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            version: row.get("version")?,
            content: row.get("content")?,
            font_left: row.get("font_left")?,
            font_right: row.get("font_right")?,
            active: row.get("active")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Input for creating a study text
#[derive(Debug, Clone, Deserialize)]
pub struct CreateStudyTextInput {
    pub version: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_font_left")]
    pub font_left: String,
    #[serde(default = "default_font_right")]
    pub font_right: String,
    #[serde(default)]
    pub active: bool,
}

pub fn default_font_left() -> String { "serif".to_string() }
pub fn default_font_right() -> String { "sans".to_string() }

impl CreateStudyTextInput {
    /// Inactive version with default fonts
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            content: String::new(),
            font_left: default_font_left(),
            font_right: default_font_right(),
            active: false,
        }
    }
}

/// Partial update - `None` leaves a column untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudyTextPatch {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub font_left: Option<String>,
    #[serde(default)]
    pub font_right: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl StudyTextPatch {
    pub fn is_empty(&self) -> bool {
        self.version.is_none()
            && self.content.is_none()
            && self.font_left.is_none()
            && self.font_right.is_none()
            && self.active.is_none()
    }
}

/// Get study text by ID
pub fn get_study_text(conn: &Connection, id: i64) -> Result<Option<StudyTextRow>, StorageError> {
    conn.query_row(
        "SELECT * FROM study_texts WHERE id = ?",
        params![id],
        |row| StudyTextRow::from_row(row),
    )
    .optional()
    .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))
}

/// Get study text by version label
pub fn get_study_text_by_version(conn: &Connection, version: &str) -> Result<Option<StudyTextRow>, StorageError> {
    conn.query_row(
        "SELECT * FROM study_texts WHERE version = ?",
        params![version],
        |row| StudyTextRow::from_row(row),
    )
    .optional()
    .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))
}

/// Get the active study text, if any
pub fn get_active_study_text(conn: &Connection) -> Result<Option<StudyTextRow>, StorageError> {
    conn.query_row(
        "SELECT * FROM study_texts WHERE active = 1 ORDER BY id DESC LIMIT 1",
        [],
        |row| StudyTextRow::from_row(row),
    )
    .optional()
    .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))
}

/// List all study texts, newest first
pub fn list_study_texts(conn: &Connection) -> Result<Vec<StudyTextRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM study_texts ORDER BY created_at DESC, id DESC")
        .map_err(|e| StorageError::Database(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map([], |row| StudyTextRow::from_row(row))
        .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Count study texts (seed loader uses this to detect an empty store)
pub fn count_study_texts(conn: &Connection) -> Result<u64, StorageError> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM study_texts", [], |row| row.get(0))
        .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))?;

    Ok(count as u64)
}

/// Clear the active flag on every row except `keep_id`
fn deactivate_others(conn: &Connection, keep_id: Option<i64>) -> Result<usize, StorageError> {
    let cleared = match keep_id {
        Some(id) => conn.execute(
            "UPDATE study_texts SET active = 0 WHERE active = 1 AND id != ?",
            params![id],
        ),
        None => conn.execute("UPDATE study_texts SET active = 0 WHERE active = 1", []),
    }
    .map_err(|e| StorageError::Database(format!("Deactivate failed: {}", e)))?;

    if cleared > 0 {
        debug!(cleared, "Deactivated previous study text");
    }

    Ok(cleared)
}

/// Insert a new study text on an open transaction
///
/// Clears every other active flag first when `input.active` is set.
pub(crate) fn insert_study_text(conn: &Connection, input: &CreateStudyTextInput) -> Result<i64, StorageError> {
    if input.active {
        deactivate_others(conn, None)?;
    }

    let now = now_timestamp();
    conn.execute(
        r#"
        INSERT INTO study_texts (version, content, font_left, font_right, active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            input.version,
            input.content,
            input.font_left,
            input.font_right,
            input.active,
            now,
            now,
        ],
    ).map_err(|e| {
        if is_unique_violation(&e) {
            StorageError::Conflict(format!("study text version '{}' already exists", input.version))
        } else {
            StorageError::Database(format!("Insert failed: {}", e))
        }
    })?;

    Ok(conn.last_insert_rowid())
}

/// Create a study text, absorbing duplicates of an existing version label
pub fn create_study_text(
    conn: &mut Connection,
    input: CreateStudyTextInput,
) -> Result<CreateOutcome<StudyTextRow>, StorageError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| StorageError::Database(format!("Transaction failed: {}", e)))?;

    if let Some(existing) = get_study_text_by_version(&tx, &input.version)? {
        debug!(id = existing.id, version = %existing.version, "Study text version already exists");
        return Ok(CreateOutcome { row: existing, created: false });
    }

    let id = insert_study_text(&tx, &input)?;

    tx.commit()
        .map_err(|e| StorageError::Database(format!("Commit failed: {}", e)))?;

    info!(id, version = %input.version, active = input.active, "Created study text");

    let row = get_study_text(conn, id)?
        .ok_or_else(|| StorageError::Internal("Study text not found after insert".to_string()))?;

    Ok(CreateOutcome { row, created: true })
}

/// Apply a partial update to a study text
pub fn update_study_text(
    conn: &mut Connection,
    id: i64,
    patch: &StudyTextPatch,
) -> Result<StudyTextRow, StorageError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| StorageError::Database(format!("Transaction failed: {}", e)))?;

    let current = get_study_text(&tx, id)?
        .ok_or_else(|| StorageError::NotFound(format!("study text {} not found", id)))?;

    // The active row is only replaced by activating another one
    if patch.active == Some(false) && current.active {
        return Err(StorageError::Conflict(format!(
            "study text '{}' is the active version; activate another version instead",
            current.version
        )));
    }

    if patch.active == Some(true) {
        deactivate_others(&tx, Some(id))?;
    }

    let mut sets: Vec<&str> = vec![];
    let mut values: Vec<Box<dyn ToSql>> = vec![];

    if let Some(ref version) = patch.version {
        sets.push("version = ?");
        values.push(Box::new(version.clone()));
    }
    if let Some(ref content) = patch.content {
        sets.push("content = ?");
        values.push(Box::new(content.clone()));
    }
    if let Some(ref font_left) = patch.font_left {
        sets.push("font_left = ?");
        values.push(Box::new(font_left.clone()));
    }
    if let Some(ref font_right) = patch.font_right {
        sets.push("font_right = ?");
        values.push(Box::new(font_right.clone()));
    }
    if let Some(active) = patch.active {
        sets.push("active = ?");
        values.push(Box::new(active));
    }

    sets.push("updated_at = ?");
    values.push(Box::new(now_timestamp()));
    values.push(Box::new(id));

    let sql = format!("UPDATE study_texts SET {} WHERE id = ?", sets.join(", "));
    let param_refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();

    tx.execute(&sql, param_refs.as_slice()).map_err(|e| {
        if is_unique_violation(&e) {
            StorageError::Conflict(format!(
                "study text version '{}' already exists",
                patch.version.as_deref().unwrap_or_default()
            ))
        } else {
            StorageError::Database(format!("Update failed: {}", e))
        }
    })?;

    tx.commit()
        .map_err(|e| StorageError::Database(format!("Commit failed: {}", e)))?;

    get_study_text(conn, id)?
        .ok_or_else(|| StorageError::Internal("Study text not found after update".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StudyDb;

    fn active_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM study_texts WHERE active = 1", [], |row| row.get(0))
            .unwrap()
    }

    fn active_input(version: &str) -> CreateStudyTextInput {
        CreateStudyTextInput { active: true, ..CreateStudyTextInput::new(version) }
    }

    #[test]
    fn test_create_fills_default_fonts() {
        let input: CreateStudyTextInput = serde_json::from_str(r#"{"version": "v1"}"#).unwrap();
        assert_eq!(input.font_left, "serif");
        assert_eq!(input.font_right, "sans");
        assert!(!input.active);
    }

    #[test]
    fn test_duplicate_version_is_absorbed() {
        let db = StudyDb::open_in_memory().unwrap();

        let first = db.with_conn_mut(|conn| create_study_text(conn, CreateStudyTextInput::new("v1"))).unwrap();
        let second = db.with_conn_mut(|conn| create_study_text(conn, active_input("v1"))).unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.row.id, second.row.id);
        // The absorbed create does not apply its own fields
        assert!(!second.row.active);
        assert_eq!(db.with_conn(count_study_texts).unwrap(), 1);
    }

    #[test]
    fn test_single_active_across_creates_and_updates() {
        let db = StudyDb::open_in_memory().unwrap();

        db.with_conn(|conn| {
            assert_eq!(active_count(conn), 0);
            Ok(())
        }).unwrap();

        let mut ids = vec![];
        for version in ["a", "b", "c"] {
            let out = db.with_conn_mut(|conn| create_study_text(conn, active_input(version))).unwrap();
            ids.push(out.row.id);
            db.with_conn(|conn| {
                assert_eq!(active_count(conn), 1);
                Ok(())
            }).unwrap();
        }

        let patch = StudyTextPatch { active: Some(true), ..Default::default() };
        let updated = db.with_conn_mut(|conn| update_study_text(conn, ids[0], &patch)).unwrap();
        assert!(updated.active);

        db.with_conn(|conn| {
            assert_eq!(active_count(conn), 1);
            assert_eq!(get_active_study_text(conn)?.unwrap().id, ids[0]);
            Ok(())
        }).unwrap();
    }

    #[test]
    fn test_deactivating_active_version_conflicts() {
        let db = StudyDb::open_in_memory().unwrap();
        let live = db.with_conn_mut(|conn| create_study_text(conn, active_input("v1"))).unwrap();
        let draft = db.with_conn_mut(|conn| create_study_text(conn, CreateStudyTextInput::new("v2"))).unwrap();

        let patch = StudyTextPatch { active: Some(false), ..Default::default() };
        let result = db.with_conn_mut(|conn| update_study_text(conn, live.row.id, &patch));
        assert!(matches!(result, Err(StorageError::Conflict(_))));
        assert_eq!(db.with_conn(get_active_study_text).unwrap().unwrap().id, live.row.id);

        // Already inactive rows accept the no-op
        let unchanged = db.with_conn_mut(|conn| update_study_text(conn, draft.row.id, &patch)).unwrap();
        assert!(!unchanged.active);
    }

    #[test]
    fn test_patch_writes_empty_string() {
        let db = StudyDb::open_in_memory().unwrap();
        let out = db.with_conn_mut(|conn| create_study_text(conn, CreateStudyTextInput::new("v1"))).unwrap();

        let patch = StudyTextPatch { font_left: Some(String::new()), ..Default::default() };
        let updated = db.with_conn_mut(|conn| update_study_text(conn, out.row.id, &patch)).unwrap();

        assert_eq!(updated.font_left, "");
        assert_eq!(updated.font_right, "sans");
    }

    #[test]
    fn test_rename_onto_existing_version_conflicts() {
        let db = StudyDb::open_in_memory().unwrap();
        db.with_conn_mut(|conn| create_study_text(conn, CreateStudyTextInput::new("v1"))).unwrap();
        let v2 = db.with_conn_mut(|conn| create_study_text(conn, CreateStudyTextInput::new("v2"))).unwrap();

        let patch = StudyTextPatch { version: Some("v1".into()), ..Default::default() };
        let result = db.with_conn_mut(|conn| update_study_text(conn, v2.row.id, &patch));

        assert!(matches!(result, Err(StorageError::Conflict(_))));
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let db = StudyDb::open_in_memory().unwrap();
        let patch = StudyTextPatch { content: Some("x".into()), ..Default::default() };
        let result = db.with_conn_mut(|conn| update_study_text(conn, 42, &patch));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_list_newest_first() {
        let db = StudyDb::open_in_memory().unwrap();
        for version in ["old", "mid", "new"] {
            db.with_conn_mut(|conn| create_study_text(conn, CreateStudyTextInput::new(version))).unwrap();
        }

        let versions: Vec<String> = db.with_conn(list_study_texts).unwrap()
            .into_iter()
            .map(|t| t.version)
            .collect();
        assert_eq!(versions, vec!["new", "mid", "old"]);
    }
}
