//! Session service - participants and study sessions

use std::sync::Arc;

use crate::db::{sessions, CreateParticipantInput, CreateSessionInput, ParticipantRow, StudyDb, StudySessionRow};
use crate::error::StorageError;
use crate::session_id::generate_session_id;

use super::events::{EventBus, StudyEvent};

/// Source recorded when the client sends none
pub const DEFAULT_SOURCE: &str = "web";

pub struct SessionService {
    db: Arc<StudyDb>,
    events: Arc<EventBus>,
}

impl SessionService {
    pub fn new(db: Arc<StudyDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    /// Register a participant; a blank source becomes "web"
    pub fn create_participant(&self, input: CreateParticipantInput) -> Result<ParticipantRow, StorageError> {
        let source = input
            .source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SOURCE);

        let row = self.db.with_conn(|conn| sessions::create_participant(conn, source))?;

        self.events.emit(StudyEvent::ParticipantCreated {
            id: row.id,
            source: row.source.clone(),
        });

        Ok(row)
    }

    /// Open a session for an existing participant
    ///
    /// A blank `session_id` is generated. A duplicate one is a conflict and
    /// is not retried.
    pub fn create_session(&self, input: CreateSessionInput) -> Result<StudySessionRow, StorageError> {
        if input.participant_id <= 0 {
            return Err(StorageError::InvalidInput("participant_id is required".into()));
        }

        let session_id = match input.session_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => generate_session_id(),
        };

        let row = self.db.with_conn(|conn| sessions::create_session(conn, &session_id, &input))?;

        self.events.emit(StudyEvent::SessionCreated {
            id: row.id,
            session_id: row.session_id.clone(),
            participant_id: row.participant_id,
        });

        Ok(row)
    }

    pub fn get_session(&self, id: i64) -> Result<StudySessionRow, StorageError> {
        self.db
            .with_conn(|conn| sessions::get_session(conn, id))?
            .ok_or_else(|| StorageError::NotFound(format!("session {} not found", id)))
    }

    pub fn get_participant(&self, id: i64) -> Result<ParticipantRow, StorageError> {
        self.db
            .with_conn(|conn| sessions::get_participant(conn, id))?
            .ok_or_else(|| StorageError::NotFound(format!("participant {} not found", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> SessionService {
        let db = Arc::new(StudyDb::open_in_memory().unwrap());
        SessionService::new(db, Arc::new(EventBus::new()))
    }

    #[test]
    fn test_blank_source_defaults_to_web() {
        let svc = service();
        let blank = svc.create_participant(CreateParticipantInput { source: Some(" ".into()) }).unwrap();
        let missing = svc.create_participant(CreateParticipantInput::default()).unwrap();
        let given = svc.create_participant(CreateParticipantInput { source: Some("prolific".into()) }).unwrap();

        assert_eq!(blank.source, "web");
        assert_eq!(missing.source, "web");
        assert_eq!(given.source, "prolific");
        assert_eq!(svc.get_participant(given.id).unwrap().source, "prolific");
    }

    #[test]
    fn test_session_id_generated_when_blank() {
        let svc = service();
        let p = svc.create_participant(CreateParticipantInput::default()).unwrap();

        let generated = svc.create_session(CreateSessionInput::for_participant(p.id)).unwrap();
        assert_eq!(generated.session_id.len(), 32);

        let supplied = svc
            .create_session(CreateSessionInput {
                session_id: Some("client-chosen".into()),
                ..CreateSessionInput::for_participant(p.id)
            })
            .unwrap();
        assert_eq!(supplied.session_id, "client-chosen");
        assert_eq!(svc.get_session(supplied.id).unwrap().participant_id, p.id);
    }

    #[test]
    fn test_duplicate_session_id_is_conflict() {
        let svc = service();
        let p = svc.create_participant(CreateParticipantInput::default()).unwrap();
        let input = CreateSessionInput {
            session_id: Some("same".into()),
            ..CreateSessionInput::for_participant(p.id)
        };

        svc.create_session(input.clone()).unwrap();
        assert!(matches!(svc.create_session(input), Err(StorageError::Conflict(_))));
    }

    #[test]
    fn test_session_requires_participant() {
        let svc = service();
        assert!(matches!(
            svc.create_session(CreateSessionInput::for_participant(0)),
            Err(StorageError::InvalidInput(_))
        ));
        assert!(matches!(
            svc.create_session(CreateSessionInput::for_participant(42)),
            Err(StorageError::NotFound(_))
        ));
    }
}
