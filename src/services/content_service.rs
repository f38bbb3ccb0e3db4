//! Content service - study versions, passages and quiz questions
//!
//! Wraps the content repositories with validation, active-version
//! resolution and event emission.

use std::sync::Arc;

use serde::Serialize;

use crate::db::{self, passages, quiz_questions, study_texts, CreateOutcome, StudyDb};
use crate::db::{
    CreatePassageInput, CreateQuizQuestionInput, CreateStudyTextInput, PassagePatch, PassageRow,
    QuizQuestionPatch, StudyTextPatch, StudyTextRow,
};
use crate::db::quiz_questions::{QuestionFailure, QuestionList, QuizQuestion};
use crate::error::StorageError;

use super::events::{EventBus, StudyEvent};

/// Passage as served to participants, fonts resolved against the version
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedPassage {
    pub id: i64,
    pub order: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    pub font_left: String,
    pub font_right: String,
}

impl ResolvedPassage {
    fn resolve(passage: PassageRow, parent: &StudyTextRow) -> Self {
        let pick = |own: Option<String>, fallback: &str| {
            own.filter(|f| !f.is_empty()).unwrap_or_else(|| fallback.to_string())
        };
        Self {
            id: passage.id,
            order: passage.order,
            title: passage.title,
            content: passage.content,
            font_left: pick(passage.font_left, &parent.font_left),
            font_right: pick(passage.font_right, &parent.font_right),
        }
    }
}

/// Content bundle for the active version
///
/// Carries `passages` when the version has any, otherwise the legacy
/// single-body `content`.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveContent {
    pub id: i64,
    pub version: String,
    pub font_left: String,
    pub font_right: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passages: Option<Vec<ResolvedPassage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Question shape for the participant-facing quiz endpoint
#[derive(Debug, Clone, Serialize)]
pub struct PublicQuestion {
    /// The question's label, e.g. "q1"
    pub id: String,
    pub prompt: String,
    pub choices: Vec<String>,
    pub answer: i64,
}

/// Participant-facing question list
#[derive(Debug, Clone, Serialize)]
pub struct PublicQuestionList {
    pub questions: Vec<PublicQuestion>,
    pub failures: Vec<QuestionFailure>,
}

impl From<QuestionList> for PublicQuestionList {
    fn from(list: QuestionList) -> Self {
        Self {
            questions: list
                .questions
                .into_iter()
                .map(|q| PublicQuestion {
                    id: q.question_id,
                    prompt: q.prompt,
                    choices: q.choices,
                    answer: q.answer,
                })
                .collect(),
            failures: list.failures,
        }
    }
}

/// Content service for business logic
pub struct ContentService {
    db: Arc<StudyDb>,
    events: Arc<EventBus>,
}

impl ContentService {
    pub fn new(db: Arc<StudyDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Study text versions
    // =========================================================================

    /// Create a version; an existing label is returned with `created = false`
    pub fn create_version(
        &self,
        mut input: CreateStudyTextInput,
    ) -> Result<CreateOutcome<StudyTextRow>, StorageError> {
        input.version = input.version.trim().to_string();
        if input.version.is_empty() {
            return Err(StorageError::InvalidInput("version is required".into()));
        }
        if input.font_left.is_empty() {
            input.font_left = study_texts::default_font_left();
        }
        if input.font_right.is_empty() {
            input.font_right = study_texts::default_font_right();
        }

        let outcome = self.db.with_conn_mut(|conn| study_texts::create_study_text(conn, input))?;

        if outcome.created {
            self.events.emit(StudyEvent::StudyTextCreated {
                id: outcome.row.id,
                version: outcome.row.version.clone(),
                active: outcome.row.active,
            });
            if outcome.row.active {
                self.emit_activated(&outcome.row);
            }
        }

        Ok(outcome)
    }

    /// Apply a partial update; activating clears every other version
    pub fn update_version(&self, id: i64, mut patch: StudyTextPatch) -> Result<StudyTextRow, StorageError> {
        if let Some(version) = patch.version.as_mut() {
            *version = version.trim().to_string();
            if version.is_empty() {
                return Err(StorageError::InvalidInput("version must not be empty".into()));
            }
        }
        if patch.is_empty() {
            return self.get_version(id);
        }

        let row = self.db.with_conn_mut(|conn| study_texts::update_study_text(conn, id, &patch))?;

        self.events.emit(StudyEvent::StudyTextUpdated { id });
        if patch.active == Some(true) {
            self.emit_activated(&row);
        }

        Ok(row)
    }

    /// All versions, newest first
    pub fn list_versions(&self) -> Result<Vec<StudyTextRow>, StorageError> {
        self.db.with_conn(study_texts::list_study_texts)
    }

    /// Version by ID
    pub fn get_version(&self, id: i64) -> Result<StudyTextRow, StorageError> {
        self.db
            .with_conn(|conn| study_texts::get_study_text(conn, id))?
            .ok_or_else(|| StorageError::NotFound(format!("study text {} not found", id)))
    }

    /// Resolve the version to serve
    ///
    /// A known `requested` label wins; anything else falls back to the
    /// active version.
    pub fn get_active_version(&self, requested: Option<&str>) -> Result<ActiveContent, StorageError> {
        self.db.with_conn(|conn| {
            let by_label = match requested.map(str::trim).filter(|v| !v.is_empty()) {
                Some(label) => study_texts::get_study_text_by_version(conn, label)?,
                None => None,
            };
            let study_text = match by_label {
                Some(row) => row,
                None => study_texts::get_active_study_text(conn)?
                    .ok_or_else(|| StorageError::NotFound("no active study text".into()))?,
            };

            let rows = passages::list_passages(conn, study_text.id)?;
            let (passages, content) = if rows.is_empty() {
                (None, Some(study_text.content.clone()))
            } else {
                let resolved = rows
                    .into_iter()
                    .map(|p| ResolvedPassage::resolve(p, &study_text))
                    .collect();
                (Some(resolved), None)
            };

            Ok(ActiveContent {
                id: study_text.id,
                version: study_text.version,
                font_left: study_text.font_left,
                font_right: study_text.font_right,
                active: study_text.active,
                passages,
                content,
            })
        })
    }

    fn emit_activated(&self, row: &StudyTextRow) {
        self.events.emit(StudyEvent::StudyTextActivated {
            id: row.id,
            version: row.version.clone(),
        });
    }

    // =========================================================================
    // Passages
    // =========================================================================

    /// Create a passage; a missing `order` appends after the last one
    pub fn create_passage(&self, input: CreatePassageInput) -> Result<PassageRow, StorageError> {
        if input.content.trim().is_empty() {
            return Err(StorageError::InvalidInput("content is required".into()));
        }
        validate_order(input.order)?;

        let row = self.db.with_conn_mut(|conn| passages::create_passage(conn, input))?;

        self.events.emit(StudyEvent::PassageCreated {
            id: row.id,
            study_text_id: row.study_text_id,
            order: row.order,
        });

        Ok(row)
    }

    pub fn update_passage(&self, id: i64, patch: PassagePatch) -> Result<PassageRow, StorageError> {
        if let Some(ref content) = patch.content {
            if content.trim().is_empty() {
                return Err(StorageError::InvalidInput("content must not be empty".into()));
            }
        }
        validate_order(patch.order)?;
        if patch.is_empty() {
            return self.get_passage(id);
        }

        let row = self.db.with_conn(|conn| passages::update_passage(conn, id, &patch))?;
        self.events.emit(StudyEvent::PassageUpdated { id });
        Ok(row)
    }

    /// Hard delete; remaining orders are left as they are
    pub fn delete_passage(&self, id: i64) -> Result<bool, StorageError> {
        let deleted = self.db.with_conn(|conn| passages::delete_passage(conn, id))?;
        if deleted {
            self.events.emit(StudyEvent::PassageDeleted { id });
        }
        Ok(deleted)
    }

    pub fn get_passage(&self, id: i64) -> Result<PassageRow, StorageError> {
        self.db
            .with_conn(|conn| passages::get_passage(conn, id))?
            .ok_or_else(|| StorageError::NotFound(format!("passage {} not found", id)))
    }

    pub fn list_passages(&self, study_text_id: i64) -> Result<Vec<PassageRow>, StorageError> {
        self.db.with_conn(|conn| passages::list_passages(conn, study_text_id))
    }

    pub fn list_all_passages(&self) -> Result<Vec<PassageRow>, StorageError> {
        self.db.with_conn(passages::list_all_passages)
    }

    // =========================================================================
    // Quiz questions
    // =========================================================================

    pub fn create_question(&self, input: CreateQuizQuestionInput) -> Result<QuizQuestion, StorageError> {
        validate_question(&input.question_id, &input.prompt, &input.choices, input.answer, input.order)?;

        let row = self.db.with_conn(|conn| quiz_questions::create_question(conn, &input))?;

        self.events.emit(StudyEvent::QuizQuestionCreated {
            id: row.id,
            study_text_id: row.study_text_id,
            question_id: row.question_id.clone(),
        });

        Ok(row.into_question())
    }

    /// Apply a partial update, validating the merged question
    pub fn update_question(&self, id: i64, patch: QuizQuestionPatch) -> Result<QuizQuestion, StorageError> {
        let row = self.db.with_conn(|conn| {
            let current = quiz_questions::get_question(conn, id)?
                .ok_or_else(|| StorageError::NotFound(format!("quiz question {} not found", id)))?;
            if patch.is_empty() {
                return Ok(current);
            }

            let choices = match patch.choices {
                Some(ref choices) => choices.clone(),
                None => quiz_questions::decode_choices(&current.choices_json).map_err(|e| {
                    StorageError::InvalidInput(format!(
                        "stored choices are unreadable ({}), supply choices to repair",
                        e
                    ))
                })?,
            };
            validate_question(
                patch.question_id.as_deref().unwrap_or(&current.question_id),
                patch.prompt.as_deref().unwrap_or(&current.prompt),
                &choices,
                patch.answer.unwrap_or(current.answer),
                patch.order.unwrap_or(current.order),
            )?;

            quiz_questions::update_question(conn, id, &patch)
        })?;

        self.events.emit(StudyEvent::QuizQuestionUpdated { id });
        Ok(row.into_question())
    }

    pub fn delete_question(&self, id: i64) -> Result<bool, StorageError> {
        let deleted = self.db.with_conn(|conn| quiz_questions::delete_question(conn, id))?;
        if deleted {
            self.events.emit(StudyEvent::QuizQuestionDeleted { id });
        }
        Ok(deleted)
    }

    pub fn get_question(&self, id: i64) -> Result<QuizQuestion, StorageError> {
        self.db
            .with_conn(|conn| quiz_questions::get_question(conn, id))?
            .map(|row| row.into_question())
            .ok_or_else(|| StorageError::NotFound(format!("quiz question {} not found", id)))
    }

    /// Questions for a version in display order; `None` means the active one
    pub fn list_questions_for_version(&self, study_text_id: Option<i64>) -> Result<QuestionList, StorageError> {
        let rows = self.db.with_conn(|conn| {
            let id = match study_text_id {
                Some(id) => study_texts::get_study_text(conn, id)?
                    .ok_or_else(|| StorageError::NotFound(format!("study text {} not found", id)))?
                    .id,
                None => study_texts::get_active_study_text(conn)?
                    .ok_or_else(|| StorageError::NotFound("no active study text".into()))?
                    .id,
            };
            quiz_questions::list_questions(conn, id)
        })?;

        Ok(QuestionList::from_rows(rows))
    }

    pub fn list_all_questions(&self) -> Result<QuestionList, StorageError> {
        let rows = self.db.with_conn(quiz_questions::list_all_questions)?;
        Ok(QuestionList::from_rows(rows))
    }

    /// Row counts for the health endpoint
    pub fn stats(&self) -> Result<db::DbStats, StorageError> {
        self.db.stats()
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_order(order: Option<i64>) -> Result<(), StorageError> {
    match order {
        Some(order) if order < 0 => Err(StorageError::InvalidInput(format!(
            "order must be >= 0, got {}",
            order
        ))),
        _ => Ok(()),
    }
}

fn validate_question(
    question_id: &str,
    prompt: &str,
    choices: &[String],
    answer: i64,
    order: i64,
) -> Result<(), StorageError> {
    if question_id.trim().is_empty() {
        return Err(StorageError::InvalidInput("question_id is required".into()));
    }
    if prompt.trim().is_empty() {
        return Err(StorageError::InvalidInput("prompt is required".into()));
    }
    if choices.is_empty() {
        return Err(StorageError::InvalidInput("choices must not be empty".into()));
    }
    if answer < 0 || answer as usize >= choices.len() {
        return Err(StorageError::InvalidInput(format!(
            "answer {} is out of range for {} choices",
            answer,
            choices.len()
        )));
    }
    validate_order(Some(order))
}
