//! Event system for study store operations
//!
//! Services emit a `StudyEvent` after each successful write. The only
//! built-in subscriber is the audit logger spawned at startup.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::db::telemetry::TelemetryKind;

/// Events emitted by services
#[derive(Debug, Clone)]
pub enum StudyEvent {
    // Content events
    StudyTextCreated {
        id: i64,
        version: String,
        active: bool,
    },
    StudyTextUpdated {
        id: i64,
    },
    StudyTextActivated {
        id: i64,
        version: String,
    },
    PassageCreated {
        id: i64,
        study_text_id: i64,
        order: i64,
    },
    PassageUpdated {
        id: i64,
    },
    PassageDeleted {
        id: i64,
    },
    QuizQuestionCreated {
        id: i64,
        study_text_id: i64,
        question_id: String,
    },
    QuizQuestionUpdated {
        id: i64,
    },
    QuizQuestionDeleted {
        id: i64,
    },

    // Session events
    ParticipantCreated {
        id: i64,
        source: String,
    },
    SessionCreated {
        id: i64,
        session_id: String,
        participant_id: i64,
    },

    // Telemetry
    TelemetryRecorded {
        kind: TelemetryKind,
        id: i64,
        session_id: i64,
    },

    Seeded {
        study_text_id: i64,
        passages: usize,
        questions: usize,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &StudyEvent);
}

/// Event bus for broadcasting study events
pub struct EventBus {
    sender: broadcast::Sender<StudyEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: StudyEvent) {
        trace!(event = ?event, "Emitting study event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StudyEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &StudyEvent) {
        match event {
            StudyEvent::StudyTextCreated { id, version, active } => {
                debug!(id, version = %version, active, "Study text created");
            }
            StudyEvent::StudyTextActivated { id, version } => {
                debug!(id, version = %version, "Study text activated");
            }
            StudyEvent::SessionCreated { id, session_id, participant_id } => {
                debug!(id, session_id = %session_id, participant_id, "Session created");
            }
            StudyEvent::TelemetryRecorded { kind, id, session_id } => {
                trace!(kind = %kind, id, session_id, "Telemetry recorded");
            }
            StudyEvent::Seeded { study_text_id, passages, questions } => {
                debug!(study_text_id, passages, questions, "Seed data loaded");
            }
            _ => {
                trace!(event = ?event, "Study event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
