//! Quiz question CRUD operations
//!
//! Choices are stored as a JSON array string. Reads decode them back into a
//! list; a row whose stored choices do not decode is reported, not dropped.

use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{now_timestamp, study_texts};
use crate::error::StorageError;

/// Quiz question row from database (choices still encoded)
#[derive(Debug, Clone)]
pub struct QuizQuestionRow {
    pub id: i64,
    pub study_text_id: i64,
    pub question_id: String,
    pub prompt: String,
    pub choices_json: String,
    pub answer: i64,
    pub order: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl QuizQuestionRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            study_text_id: row.get("study_text_id")?,
            question_id: row.get("question_id")?,
            prompt: row.get("prompt")?,
            choices_json: row.get("choices_json")?,
            answer: row.get("answer")?,
            order: row.get("order_index")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Decode into the API shape; undecodable choices degrade to an empty list
    pub fn into_question(self) -> QuizQuestion {
        match decode_choices(&self.choices_json) {
            Ok(choices) => self.with_choices(choices, None),
            Err(e) => {
                warn!(id = self.id, question_id = %self.question_id, error = %e, "Stored quiz choices failed to decode");
                let error = e.to_string();
                self.with_choices(vec![], Some(error))
            }
        }
    }

    fn with_choices(self, choices: Vec<String>, choices_error: Option<String>) -> QuizQuestion {
        QuizQuestion {
            id: self.id,
            study_text_id: self.study_text_id,
            question_id: self.question_id,
            prompt: self.prompt,
            choices,
            choices_error,
            answer: self.answer,
            order: self.order,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Quiz question with decoded choices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: i64,
    pub study_text_id: i64,
    pub question_id: String,
    pub prompt: String,
    pub choices: Vec<String>,
    /// Set when the stored choices could not be decoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices_error: Option<String>,
    pub answer: i64,
    pub order: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// A question that could not be returned intact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionFailure {
    pub id: i64,
    pub question_id: String,
    pub error: String,
}

/// Partial result for question listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionList {
    pub questions: Vec<QuizQuestion>,
    pub failures: Vec<QuestionFailure>,
}

impl QuestionList {
    /// Split rows into decoded questions and per-item failures, keeping order
    pub fn from_rows(rows: Vec<QuizQuestionRow>) -> Self {
        let mut list = Self::default();
        for row in rows {
            match decode_choices(&row.choices_json) {
                Ok(choices) => list.questions.push(row.with_choices(choices, None)),
                Err(e) => {
                    warn!(id = row.id, question_id = %row.question_id, error = %e, "Skipping quiz question with undecodable choices");
                    list.failures.push(QuestionFailure {
                        id: row.id,
                        question_id: row.question_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        list
    }
}

/// Decode a stored choice list
pub fn decode_choices(raw: &str) -> Result<Vec<String>, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Encode a choice list for storage
pub fn encode_choices(choices: &[String]) -> Result<String, StorageError> {
    Ok(serde_json::to_string(choices)?)
}

/// Input for creating a quiz question
#[derive(Debug, Clone, Deserialize)]
pub struct CreateQuizQuestionInput {
    pub study_text_id: i64,
    pub question_id: String,
    pub prompt: String,
    pub choices: Vec<String>,
    pub answer: i64,
    #[serde(default)]
    pub order: i64,
}

/// Partial update for a quiz question
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuizQuestionPatch {
    #[serde(default)]
    pub question_id: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub choices: Option<Vec<String>>,
    #[serde(default)]
    pub answer: Option<i64>,
    #[serde(default)]
    pub order: Option<i64>,
}

impl QuizQuestionPatch {
    pub fn is_empty(&self) -> bool {
        self.question_id.is_none()
            && self.prompt.is_none()
            && self.choices.is_none()
            && self.answer.is_none()
            && self.order.is_none()
    }
}

/// Get quiz question by ID
pub fn get_question(conn: &Connection, id: i64) -> Result<Option<QuizQuestionRow>, StorageError> {
    conn.query_row(
        "SELECT * FROM quiz_questions WHERE id = ?",
        params![id],
        |row| QuizQuestionRow::from_row(row),
    )
    .optional()
    .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))
}

/// List questions for a study text in display order (ties by insertion)
pub fn list_questions(conn: &Connection, study_text_id: i64) -> Result<Vec<QuizQuestionRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM quiz_questions WHERE study_text_id = ? ORDER BY order_index ASC, id ASC")
        .map_err(|e| StorageError::Database(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![study_text_id], |row| QuizQuestionRow::from_row(row))
        .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// List every quiz question, grouped by study text
pub fn list_all_questions(conn: &Connection) -> Result<Vec<QuizQuestionRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM quiz_questions ORDER BY study_text_id ASC, order_index ASC, id ASC")
        .map_err(|e| StorageError::Database(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map([], |row| QuizQuestionRow::from_row(row))
        .map_err(|e| StorageError::Database(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Create a quiz question
pub fn create_question(conn: &Connection, input: &CreateQuizQuestionInput) -> Result<QuizQuestionRow, StorageError> {
    if study_texts::get_study_text(conn, input.study_text_id)?.is_none() {
        return Err(StorageError::NotFound(format!(
            "study text {} not found",
            input.study_text_id
        )));
    }

    let choices_json = encode_choices(&input.choices)?;
    let now = now_timestamp();

    conn.execute(
        r#"
        INSERT INTO quiz_questions (
            study_text_id, question_id, prompt, choices_json, answer, order_index,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            input.study_text_id,
            input.question_id,
            input.prompt,
            choices_json,
            input.answer,
            input.order,
            now,
            now,
        ],
    ).map_err(|e| StorageError::Database(format!("Insert failed: {}", e)))?;

    let id = conn.last_insert_rowid();

    info!(id, study_text_id = input.study_text_id, question_id = %input.question_id, "Created quiz question");

    get_question(conn, id)?
        .ok_or_else(|| StorageError::Internal("Quiz question not found after insert".to_string()))
}

/// Apply a partial update to a quiz question
pub fn update_question(conn: &Connection, id: i64, patch: &QuizQuestionPatch) -> Result<QuizQuestionRow, StorageError> {
    let mut sets: Vec<&str> = vec![];
    let mut values: Vec<Box<dyn ToSql>> = vec![];

    if let Some(ref question_id) = patch.question_id {
        sets.push("question_id = ?");
        values.push(Box::new(question_id.clone()));
    }
    if let Some(ref prompt) = patch.prompt {
        sets.push("prompt = ?");
        values.push(Box::new(prompt.clone()));
    }
    if let Some(ref choices) = patch.choices {
        sets.push("choices_json = ?");
        values.push(Box::new(encode_choices(choices)?));
    }
    if let Some(answer) = patch.answer {
        sets.push("answer = ?");
        values.push(Box::new(answer));
    }
    if let Some(order) = patch.order {
        sets.push("order_index = ?");
        values.push(Box::new(order));
    }

    sets.push("updated_at = ?");
    values.push(Box::new(now_timestamp()));
    values.push(Box::new(id));

    let sql = format!("UPDATE quiz_questions SET {} WHERE id = ?", sets.join(", "));
    let param_refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();

    let changes = conn
        .execute(&sql, param_refs.as_slice())
        .map_err(|e| StorageError::Database(format!("Update failed: {}", e)))?;

    if changes == 0 {
        return Err(StorageError::NotFound(format!("quiz question {} not found", id)));
    }

    get_question(conn, id)?
        .ok_or_else(|| StorageError::Internal("Quiz question not found after update".to_string()))
}

/// Delete quiz question by ID
pub fn delete_question(conn: &Connection, id: i64) -> Result<bool, StorageError> {
    let changes = conn
        .execute("DELETE FROM quiz_questions WHERE id = ?", params![id])
        .map_err(|e| StorageError::Database(format!("Delete failed: {}", e)))?;

    Ok(changes > 0)
}
