//! Configuration for readability-storage

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("readability-storage")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the database and config file
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// SQLite file name inside `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Origins echoed back in `Access-Control-Allow-Origin`
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Load the default study version into an empty database at startup
    #[serde(default = "default_true")]
    pub seed_on_startup: bool,
}

fn default_database_file() -> String {
    "readability.db".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://localhost:4173".to_string(),
        "http://localhost:3000".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            http_port: default_http_port(),
            bind_address: default_bind_address(),
            allowed_origins: default_allowed_origins(),
            seed_on_startup: true,
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get database file path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
