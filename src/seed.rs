//! Default study content loaded on first start
//!
//! Runs only against an empty `study_texts` table. Everything is inserted in
//! one transaction so a failed seed leaves no partial version behind.

use rusqlite::TransactionBehavior;
use serde::Serialize;
use tracing::{debug, info};

use crate::db::passages::{self, CreatePassageInput};
use crate::db::quiz_questions::{self, CreateQuizQuestionInput};
use crate::db::study_texts::{self, CreateStudyTextInput};
use crate::db::StudyDb;
use crate::error::StorageError;

/// Version label of the seeded study text
pub const DEFAULT_VERSION: &str = "default";

/// What the seed loader did
#[derive(Debug, Clone, Serialize)]
pub struct SeedReport {
    pub seeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub study_text_id: Option<i64>,
    pub passages: usize,
    pub questions: usize,
}

impl SeedReport {
    fn skipped() -> Self {
        Self {
            seeded: false,
            study_text_id: None,
            passages: 0,
            questions: 0,
        }
    }
}

struct SeedPassage {
    title: &'static str,
    content: &'static str,
    font_left: &'static str,
    font_right: &'static str,
}

struct SeedQuestion {
    question_id: &'static str,
    prompt: &'static str,
    choices: [&'static str; 4],
    answer: i64,
    order: i64,
}

const PASSAGES: [SeedPassage; 6] = [
    SeedPassage {
        title: "Passage 1: Introduction to Reading",
        content: "Reading is a complex cognitive process that involves decoding symbols to derive meaning. This process requires the coordination of multiple brain regions working together to transform written text into comprehensible information. The human brain processes visual information through the eyes, sending signals to various neural networks that interpret and understand the text.",
        font_left: "serif",
        font_right: "sans",
    },
    SeedPassage {
        title: "Passage 2: Typography and Readability",
        content: "Typography plays a crucial role in how we perceive and understand written content. Different font styles can significantly impact reading speed, comprehension, and overall user experience. Serif fonts, with their decorative strokes, are often associated with traditional print media, while sans-serif fonts offer a cleaner, more modern appearance.",
        font_left: "sans",
        font_right: "serif",
    },
    SeedPassage {
        title: "Passage 3: Reading Research",
        content: "Researchers have conducted extensive studies to understand how different typographic choices affect reading performance. These studies examine factors such as font size, line spacing, letter spacing, and font style. The goal is to identify optimal typography settings that maximize readability and comprehension for various audiences and contexts.",
        font_left: "serif",
        font_right: "sans",
    },
    SeedPassage {
        title: "Passage 4: Digital Reading",
        content: "The shift from print to digital media has introduced new challenges and opportunities in typography. Screen readability differs from print, requiring careful consideration of font rendering, display resolution, and viewing conditions. Designers must balance aesthetic appeal with functional readability to create effective digital reading experiences.",
        font_left: "sans",
        font_right: "serif",
    },
    SeedPassage {
        title: "Passage 5: Accessibility in Design",
        content: "Accessibility is a fundamental principle in modern design, ensuring that content is readable and understandable for people with diverse abilities and needs. This includes considerations for visual impairments, cognitive differences, and various reading contexts. Good typography choices can make content more accessible to a wider audience.",
        font_left: "serif",
        font_right: "sans",
    },
    SeedPassage {
        title: "Passage 6: The Future of Reading",
        content: "As technology continues to evolve, so too will our understanding of reading and typography. Emerging technologies like e-ink displays, variable fonts, and adaptive interfaces offer new possibilities for optimizing reading experiences. The future of typography lies in creating flexible, responsive designs that adapt to individual preferences and reading contexts.",
        font_left: "sans",
        font_right: "serif",
    },
];

const QUESTIONS: [SeedQuestion; 5] = [
    SeedQuestion {
        question_id: "q1",
        prompt: "What is the purpose of this passage?",
        choices: [
            "To teach advanced speed-reading",
            "To test font readability and comprehension",
            "To explain eye-tracking algorithms",
            "To measure typing accuracy",
        ],
        answer: 1,
        order: 1,
    },
    SeedQuestion {
        question_id: "q2",
        prompt: "How should you read the passage?",
        choices: [
            "As quickly as possible without understanding",
            "Only the first sentence",
            "At a natural pace focusing on understanding",
            "Backwards to test attention",
        ],
        answer: 2,
        order: 2,
    },
    SeedQuestion {
        question_id: "q3",
        prompt: "According to the passage, what does reading involve?",
        choices: [
            "Only recognizing letters",
            "Decoding symbols to derive meaning",
            "Memorizing text word-for-word",
            "Counting words per minute",
        ],
        answer: 1,
        order: 3,
    },
    SeedQuestion {
        question_id: "q4",
        prompt: "What should you avoid when reading this passage?",
        choices: [
            "Reading at a natural pace",
            "Focusing on understanding",
            "Skimming through the content",
            "Decoding the symbols",
        ],
        answer: 2,
        order: 4,
    },
    SeedQuestion {
        question_id: "q5",
        prompt: "What is described as a \"complex cognitive process\"?",
        choices: ["Writing", "Reading", "Speaking", "Listening"],
        answer: 1,
        order: 5,
    },
];

/// Load the default version when no study text exists yet
pub fn seed_initial_data(db: &StudyDb) -> Result<SeedReport, StorageError> {
    db.with_conn_mut(|conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StorageError::Database(format!("Transaction failed: {}", e)))?;

        if study_texts::count_study_texts(&tx)? > 0 {
            debug!("Study texts present, skipping seed");
            return Ok(SeedReport::skipped());
        }

        let study_text_id = study_texts::insert_study_text(
            &tx,
            &CreateStudyTextInput {
                active: true,
                ..CreateStudyTextInput::new(DEFAULT_VERSION)
            },
        )?;

        for (order, passage) in PASSAGES.iter().enumerate() {
            let input = CreatePassageInput {
                title: Some(passage.title.to_string()),
                font_left: Some(passage.font_left.to_string()),
                font_right: Some(passage.font_right.to_string()),
                ..CreatePassageInput::new(study_text_id, passage.content)
            };
            passages::insert_passage(&tx, &input, order as i64)?;
        }

        for question in &QUESTIONS {
            let input = CreateQuizQuestionInput {
                study_text_id,
                question_id: question.question_id.to_string(),
                prompt: question.prompt.to_string(),
                choices: question.choices.iter().map(|c| c.to_string()).collect(),
                answer: question.answer,
                order: question.order,
            };
            quiz_questions::create_question(&tx, &input)?;
        }

        tx.commit()
            .map_err(|e| StorageError::Database(format!("Commit failed: {}", e)))?;

        info!(
            study_text_id,
            passages = PASSAGES.len(),
            questions = QUESTIONS.len(),
            "Seeded default study content"
        );

        Ok(SeedReport {
            seeded: true,
            study_text_id: Some(study_text_id),
            passages: PASSAGES.len(),
            questions: QUESTIONS.len(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::study_texts::get_active_study_text;

    #[test]
    fn test_seed_populates_default_version() {
        let db = StudyDb::open_in_memory().unwrap();
        let report = seed_initial_data(&db).unwrap();

        assert!(report.seeded);
        assert_eq!(report.passages, 6);
        assert_eq!(report.questions, 5);

        let active = db.with_conn(get_active_study_text).unwrap().unwrap();
        assert_eq!(active.version, DEFAULT_VERSION);
        assert_eq!(Some(active.id), report.study_text_id);

        let rows = db.with_conn(|conn| passages::list_passages(conn, active.id)).unwrap();
        let orders: Vec<i64> = rows.iter().map(|p| p.order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(rows[1].font_left.as_deref(), Some("sans"));
    }

    #[test]
    fn test_seed_is_noop_when_content_exists() {
        let db = StudyDb::open_in_memory().unwrap();
        seed_initial_data(&db).unwrap();
        let second = seed_initial_data(&db).unwrap();

        assert!(!second.seeded);
        let stats = db.stats().unwrap();
        assert_eq!(stats.study_texts, 1);
        assert_eq!(stats.passages, 6);
        assert_eq!(stats.quiz_questions, 5);
    }
}
