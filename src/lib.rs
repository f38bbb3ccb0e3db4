//! Readability Storage - backend store for a typography reading study
//!
//! Serves versioned study content to the study client and records the
//! telemetry a participant produces during a session.
//!
//! ## Architecture
//!
//! - **Content store**: study text versions with ordered passages and quiz
//!   questions. At most one version is active at a time.
//! - **Session registry**: participants and their study sessions
//! - **Telemetry ledger**: append-only calibration, accuracy, quiz, gaze and
//!   reading events, each tied to a session
//! - **Seed loader**: default version for an empty database
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/readability-storage/
//! ├── readability.db         # SQLite database (WAL mode)
//! └── config.toml            # Configuration
//! ```

pub mod config;
pub mod error;
pub mod db;
pub mod services;
pub mod session_id;
pub mod seed;
pub mod http;

// Re-exports
pub use config::Config;
pub use error::StorageError;
pub use db::StudyDb;
pub use services::Services;
pub use http::HttpServer;
pub use seed::{seed_initial_data, SeedReport};
