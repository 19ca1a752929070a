use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub project_id: Option<String>,
    pub endpoint: Option<String>,
    pub payload_encoding: Option<String>,
    pub logging_level: Option<String>,
    pub request_timeout_sec: Option<u64>,

    // Sections
    pub auth: Option<AuthConfig>,
    pub long_running: Option<LongRunningConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub access_token: Option<String>,
    /// Shell command printing a token, e.g. "gcloud auth print-access-token".
    pub token_command: Option<String>,
    pub token_command_timeout_sec: Option<u64>,
    /// Service account JSON key.
    pub credentials_file: Option<String>,
    pub metadata_server: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LongRunningConfig {
    pub extend_by_ms: Option<u64>,
    pub period_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
