//! Readability Storage Daemon
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (port 8080, seeded database)
//! readability-storage
//!
//! # Start with custom config
//! readability-storage --config /path/to/config.toml
//!
//! # Custom port and storage directory
//! PORT=9000 readability-storage --storage-dir /data/study
//!
//! # Leave an empty database empty
//! readability-storage --no-seed
//! ```

use clap::Parser;
use readability_storage::services::events::spawn_logging_listener;
use readability_storage::services::StudyEvent;
use readability_storage::{seed_initial_data, Config, HttpServer, Services, StudyDb};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "readability-storage")]
#[command(about = "Content and telemetry store for the readability study")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "PORT")]
    http_port: Option<u16>,

    /// Skip loading the default study version
    #[arg(long)]
    no_seed: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("readability_storage=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if args.no_seed {
        config.seed_on_startup = false;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        "Starting readability-storage"
    );

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(StudyDb::open(&config.database_path())?);
    let services = Arc::new(Services::new(db.clone()));
    let listener_handle = spawn_logging_listener(services.events.clone());

    if config.seed_on_startup {
        let report = seed_initial_data(&db)?;
        if let (true, Some(study_text_id)) = (report.seeded, report.study_text_id) {
            services.events.emit(StudyEvent::Seeded {
                study_text_id,
                passages: report.passages,
                questions: report.questions,
            });
        }
    }

    let http_addr: SocketAddr = format!("{}:{}", config.bind_address, config.http_port).parse()?;
    let http_server = Arc::new(
        HttpServer::new(services.clone(), http_addr).with_allowed_origins(config.allowed_origins.clone()),
    );

    info!("HTTP API available at http://{}", http_addr);
    info!("Endpoints:");
    info!("  GET  /api/health              - Health check");
    info!("  POST /api/participant         - Register participant");
    info!("  POST /api/session             - Open study session");
    info!("  POST /api/{{calibration,accuracy,quiz-response,gaze-point,reading-event}}");
    info!("  GET  /api/study-text          - Active study content");
    info!("  GET  /api/quiz-questions      - Quiz questions");
    info!("  *    /api/admin/{{study-text,passage,quiz-question}}");

    // Handle shutdown signal
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    // Run HTTP server with graceful shutdown
    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    listener_handle.abort();

    if let Ok(stats) = db.stats() {
        info!(
            study_texts = stats.study_texts,
            participants = stats.participants,
            sessions = stats.sessions,
            "Final storage stats"
        );
    }

    Ok(())
}
