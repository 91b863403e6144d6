use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Process settings. The backend's own `config` record lives in storage.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Root of file-backed storage. In-memory storage when unset.
    pub storage_dir: Option<PathBuf>,
    /// Per-call timeout for the remote platform API.
    pub request_timeout: Duration,
    pub log_format: LogFormat,
    /// Run the built-in rotation scheduler.
    pub scheduler_enabled: bool,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let log_format = match std::env::var("TFC_SECRETS_LOG_FORMAT")
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "" | "text" => LogFormat::Text,
        "json" => LogFormat::Json,
        other => anyhow::bail!("TFC_SECRETS_LOG_FORMAT must be 'text' or 'json', got '{}'", other),
    };

    Ok(Config {
        port: std::env::var("TFC_SECRETS_PORT")
            .unwrap_or_else(|_| "8200".into())
            .parse()
            .unwrap_or(8200),
        storage_dir: std::env::var("TFC_SECRETS_STORAGE_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        request_timeout: Duration::from_secs(
            std::env::var("TFC_SECRETS_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        ),
        log_format,
        scheduler_enabled: std::env::var("TFC_SECRETS_SCHEDULER")
            .ok()
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true),
    })
}
