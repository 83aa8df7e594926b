//! Configuration types.

use std::path::PathBuf;

/// Server and engine configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// HTTP listen port.
    pub port: u16,
    /// libSQL database file.
    pub db_path: PathBuf,
    /// JSON content catalog (agreement, documents, video, quiz).
    pub content_path: PathBuf,
    /// Actor ids allowed to perform manager-only operations.
    pub managers: Vec<String>,
    /// How many times a write is re-applied after a concurrent-update conflict.
    pub write_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/onboarding.db"),
            content_path: PathBuf::from("./config/onboarding-content.json"),
            managers: Vec::new(),
            write_retries: 3,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port: u16 = std::env::var("ONBOARD_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.port);

        let db_path = std::env::var("ONBOARD_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let content_path = std::env::var("ONBOARD_CONTENT_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.content_path);

        let managers = parse_list(&std::env::var("ONBOARD_MANAGERS").unwrap_or_default());

        let write_retries: u32 = std::env::var("ONBOARD_WRITE_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.write_retries);

        Self {
            port,
            db_path,
            content_path,
            managers,
            write_retries,
        }
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
