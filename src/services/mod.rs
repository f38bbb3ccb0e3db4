//! Service layer for readability-storage
//!
//! Services sit between HTTP handlers and the repositories in `db/`. Each
//! one adds input validation, cross-entity checks and event emission.
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! Service Layer (validation, orchestration)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod response;
pub mod events;
pub mod content_service;
pub mod session_service;
pub mod telemetry_service;

// Re-exports
pub use response::*;
pub use events::{EventBus, StudyEvent, EventListener};
pub use content_service::ContentService;
pub use session_service::SessionService;
pub use telemetry_service::TelemetryService;

use crate::db::StudyDb;
use std::sync::Arc;

/// Service container for dependency injection
///
/// Holds all services over one shared database handle.
/// Pass this to HttpServer for handler access.
pub struct Services {
    pub content: Arc<ContentService>,
    pub sessions: Arc<SessionService>,
    pub telemetry: Arc<TelemetryService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services with shared database
    pub fn new(db: Arc<StudyDb>) -> Self {
        let events = Arc::new(EventBus::new());

        Self {
            content: Arc::new(ContentService::new(db.clone(), events.clone())),
            sessions: Arc::new(SessionService::new(db.clone(), events.clone())),
            telemetry: Arc::new(TelemetryService::new(db, events.clone())),
            events,
        }
    }
}
