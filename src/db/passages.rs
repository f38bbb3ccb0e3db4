//! Passage CRUD operations
//!
//! Passages are ordered by `order_index` within their study text. Order gaps
//! are allowed; deleting a passage never renumbers its siblings.

use rusqlite::{params, Connection, OptionalExtension, Row, ToSql, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{now_timestamp, present, study_texts};
use crate::error::StorageError;

/// Passage row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassageRow {
    pub id: i64,
    pub study_text_id: i64,
    pub order: i64,
    pub content: String,
    pub title: Option<String>,
    pub font_left: Option<String>,
    pub font_right: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl PassageRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            study_text_id: row.get("study_text_id")?,
            order: row.get("order_index")?,
            content: row.get("content")?,
            title: row.get("title")?,
            font_left: row.get("font_left")?,
            font_right: row.get("font_right")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Input for creating a passage
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePassageInput {
    pub study_text_id: i64,
    /// `None` appends after the current last passage
    #[serde(default)]
    pub order: Option<i64>,
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub font_left: Option<String>,
    #[serde(default)]
    pub font_right: Option<String>,
}

impl CreatePassageInput {
    pub fn new(study_text_id: i64, content: impl Into<String>) -> Self {
        Self {
            study_text_id,
            order: None,
            content: content.into(),
            title: None,
            font_left: None,
            font_right: None,
        }
    }
}

/// Partial update for a passage
///
/// Nullable columns use `Option<Option<_>>`: absent leaves the value,
/// `null` clears it, a string sets it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PassagePatch {
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub title: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub font_left: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub font_right: Option<Option<String>>,
}

impl PassagePatch {
    pub fn is_empty(&self) -> bool {
        self.order.is_none()
            && self.content.is_none()
            && self.title.is_none()
            && self.font_left.is_none()
            && self.font_right.is_none()
    }
}

/// Get passage by ID
pub fn get_passage(conn: &Connection, id: i64) -> Result<Option<PassageRow>, StorageError> {
    conn.query_row(
        "SELECT * FROM passages WHERE id = ?",
        params![id],
        |row| PassageRow::from_row(row),
    )
    .optional()
    .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))
}

/// List passages for a study text in display order
pub fn list_passages(conn: &Connection, study_text_id: i64) -> Result<Vec<PassageRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM passages WHERE study_text_id = ? ORDER BY order_index ASC, id ASC")
        .map_err(|e| StorageError::Database(format!("Prepare failed: {}", e)))?;

    let passages = stmt
        .query_map(params![study_text_id], |row| PassageRow::from_row(row))
        .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(format!("Row parse failed: {}", e)))?;

    Ok(passages)
}

/// List every passage, grouped by study text
pub fn list_all_passages(conn: &Connection) -> Result<Vec<PassageRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM passages ORDER BY study_text_id ASC, order_index ASC, id ASC")
        .map_err(|e| StorageError::Database(format!("Prepare failed: {}", e)))?;

    let passages = stmt
        .query_map([], |row| PassageRow::from_row(row))
        .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(format!("Row parse failed: {}", e)))?;

    Ok(passages)
}

/// Next free order for a study text: max + 1, or 0 for the first passage
fn next_order(conn: &Connection, study_text_id: i64) -> Result<i64, StorageError> {
    let max: Option<i64> = conn
        .query_row(
            "SELECT MAX(order_index) FROM passages WHERE study_text_id = ?",
            params![study_text_id],
            |row| row.get(0),
        )
        .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))?;

    match max {
        None => Ok(0),
        Some(m) => m.checked_add(1).ok_or_else(|| {
            StorageError::InvalidInput(format!(
                "study text {} has no order left after {}",
                study_text_id, m
            ))
        }),
    }
}

/// Insert a passage at a known order on an open transaction
pub(crate) fn insert_passage(conn: &Connection, input: &CreatePassageInput, order: i64) -> Result<i64, StorageError> {
    let now = now_timestamp();
    conn.execute(
        r#"
        INSERT INTO passages (
            study_text_id, order_index, content, title, font_left, font_right,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            input.study_text_id,
            order,
            input.content,
            input.title,
            input.font_left,
            input.font_right,
            now,
            now,
        ],
    ).map_err(|e| StorageError::Database(format!("Insert failed: {}", e)))?;

    Ok(conn.last_insert_rowid())
}

/// Create a passage
///
/// Order assignment reads and inserts inside one immediate transaction, so
/// two creations for the same parent cannot compute the same order.
pub fn create_passage(conn: &mut Connection, input: CreatePassageInput) -> Result<PassageRow, StorageError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| StorageError::Database(format!("Transaction failed: {}", e)))?;

    if study_texts::get_study_text(&tx, input.study_text_id)?.is_none() {
        return Err(StorageError::NotFound(format!(
            "study text {} not found",
            input.study_text_id
        )));
    }

    let order = match input.order {
        Some(order) => order,
        None => next_order(&tx, input.study_text_id)?,
    };

    let id = insert_passage(&tx, &input, order)?;

    tx.commit()
        .map_err(|e| StorageError::Database(format!("Commit failed: {}", e)))?;

    info!(id, study_text_id = input.study_text_id, order, "Created passage");

    get_passage(conn, id)?
        .ok_or_else(|| StorageError::Internal("Passage not found after insert".to_string()))
}

/// Apply a partial update to a passage
pub fn update_passage(conn: &Connection, id: i64, patch: &PassagePatch) -> Result<PassageRow, StorageError> {
    let mut sets: Vec<&str> = vec![];
    let mut values: Vec<Box<dyn ToSql>> = vec![];

    if let Some(order) = patch.order {
        sets.push("order_index = ?");
        values.push(Box::new(order));
    }
    if let Some(ref content) = patch.content {
        sets.push("content = ?");
        values.push(Box::new(content.clone()));
    }
    if let Some(ref title) = patch.title {
        sets.push("title = ?");
        values.push(Box::new(title.clone()));
    }
    if let Some(ref font_left) = patch.font_left {
        sets.push("font_left = ?");
        values.push(Box::new(font_left.clone()));
    }
    if let Some(ref font_right) = patch.font_right {
        sets.push("font_right = ?");
        values.push(Box::new(font_right.clone()));
    }

    sets.push("updated_at = ?");
    values.push(Box::new(now_timestamp()));
    values.push(Box::new(id));

    let sql = format!("UPDATE passages SET {} WHERE id = ?", sets.join(", "));
    let param_refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();

    let changes = conn
        .execute(&sql, param_refs.as_slice())
        .map_err(|e| StorageError::Database(format!("Update failed: {}", e)))?;

    if changes == 0 {
        return Err(StorageError::NotFound(format!("passage {} not found", id)));
    }

    get_passage(conn, id)?
        .ok_or_else(|| StorageError::Internal("Passage not found after update".to_string()))
}

/// Delete passage by ID
pub fn delete_passage(conn: &Connection, id: i64) -> Result<bool, StorageError> {
    let changes = conn
        .execute("DELETE FROM passages WHERE id = ?", params![id])
        .map_err(|e| StorageError::Database(format!("Delete failed: {}", e)))?;

    Ok(changes > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::study_texts::{create_study_text, CreateStudyTextInput};
    use crate::db::StudyDb;

    fn db_with_text() -> (StudyDb, i64) {
        let db = StudyDb::open_in_memory().unwrap();
        let text = db
            .with_conn_mut(|conn| create_study_text(conn, CreateStudyTextInput::new("v1")))
            .unwrap();
        (db, text.row.id)
    }

    #[test]
    fn test_orders_assigned_in_creation_sequence() {
        let (db, text_id) = db_with_text();

        let orders: Vec<i64> = ["one", "two", "three"]
            .iter()
            .map(|content| {
                db.with_conn_mut(|conn| create_passage(conn, CreatePassageInput::new(text_id, *content)))
                    .unwrap()
                    .order
            })
            .collect();

        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn test_order_follows_max_after_gap() {
        let (db, text_id) = db_with_text();

        let explicit = CreatePassageInput { order: Some(7), ..CreatePassageInput::new(text_id, "late") };
        db.with_conn_mut(|conn| create_passage(conn, explicit)).unwrap();
        let next = db.with_conn_mut(|conn| create_passage(conn, CreatePassageInput::new(text_id, "next"))).unwrap();

        assert_eq!(next.order, 8);
    }

    #[test]
    fn test_append_after_max_order_is_rejected() {
        let (db, text_id) = db_with_text();

        let last = CreatePassageInput { order: Some(i64::MAX), ..CreatePassageInput::new(text_id, "last") };
        db.with_conn_mut(|conn| create_passage(conn, last)).unwrap();

        let next = db.with_conn_mut(|conn| create_passage(conn, CreatePassageInput::new(text_id, "next")));
        assert!(matches!(next, Err(StorageError::InvalidInput(_))));

        // Connection is still usable and nothing was inserted
        assert_eq!(db.with_conn(|conn| list_passages(conn, text_id)).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_appends_get_distinct_orders() {
        let (db, text_id) = db_with_text();
        let db = std::sync::Arc::new(db);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let db = db.clone();
                std::thread::spawn(move || {
                    (0..5)
                        .map(|i| {
                            let input = CreatePassageInput::new(text_id, format!("t{}-{}", t, i));
                            db.with_conn_mut(|conn| create_passage(conn, input)).unwrap().order
                        })
                        .collect::<Vec<i64>>()
                })
            })
            .collect();

        let mut orders: Vec<i64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        orders.sort_unstable();
        assert_eq!(orders, (0..40).collect::<Vec<i64>>());
    }

    #[test]
    fn test_missing_parent_is_not_found() {
        let db = StudyDb::open_in_memory().unwrap();
        let result = db.with_conn_mut(|conn| create_passage(conn, CreatePassageInput::new(99, "orphan")));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert!(db.with_conn(list_all_passages).unwrap().is_empty());
    }

    #[test]
    fn test_delete_keeps_gap() {
        let (db, text_id) = db_with_text();
        let mut ids = vec![];
        for content in ["a", "b", "c"] {
            let p = db.with_conn_mut(|conn| create_passage(conn, CreatePassageInput::new(text_id, content))).unwrap();
            ids.push(p.id);
        }

        assert!(db.with_conn(|conn| delete_passage(conn, ids[1])).unwrap());
        assert!(!db.with_conn(|conn| delete_passage(conn, ids[1])).unwrap());

        let orders: Vec<i64> = db.with_conn(|conn| list_passages(conn, text_id)).unwrap()
            .into_iter()
            .map(|p| p.order)
            .collect();
        assert_eq!(orders, vec![0, 2]);
    }

    #[test]
    fn test_patch_clears_and_sets_nullable_columns() {
        let (db, text_id) = db_with_text();
        let input = CreatePassageInput {
            title: Some("Intro".into()),
            font_left: Some("sans".into()),
            ..CreatePassageInput::new(text_id, "body")
        };
        let passage = db.with_conn_mut(|conn| create_passage(conn, input)).unwrap();

        let patch: PassagePatch = serde_json::from_str(r#"{"title": null, "font_right": "serif"}"#).unwrap();
        let updated = db.with_conn(|conn| update_passage(conn, passage.id, &patch)).unwrap();

        assert_eq!(updated.title, None);
        assert_eq!(updated.font_left.as_deref(), Some("sans"));
        assert_eq!(updated.font_right.as_deref(), Some("serif"));
        assert_eq!(updated.content, "body");
    }

    #[test]
    fn test_list_orders_by_order_then_id() {
        let (db, text_id) = db_with_text();
        for (content, order) in [("b", 1), ("a", 0), ("c", 1)] {
            let input = CreatePassageInput { order: Some(order), ..CreatePassageInput::new(text_id, content) };
            db.with_conn_mut(|conn| create_passage(conn, input)).unwrap();
        }

        let contents: Vec<String> = db.with_conn(|conn| list_passages(conn, text_id)).unwrap()
            .into_iter()
            .map(|p| p.content)
            .collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
    }
}
