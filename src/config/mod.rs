mod file_config;

pub use file_config::{AuthConfig, FileConfig, LongRunningConfig};

use crate::pubsub::auth::TOKEN_COMMAND_TIMEOUT;
use crate::pubsub::http_transport::DEFAULT_ENDPOINT;
use crate::pubsub::{
    Client, CommandToken, HttpTransport, HttpTransportConfig, LongRunningJobOptions,
    MessageCodec, MetadataServerToken, PayloadEncoding, RequestsLoggingLevel, ServiceAccountKey,
    ServiceAccountToken, StaticToken, TokenProvider,
};
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub project_id: Option<String>,
    pub endpoint: Option<String>,
    pub access_token: Option<String>,
    pub token_command: Option<String>,
    pub credentials_file: Option<PathBuf>,
    pub metadata_server: bool,
    pub payload_encoding: PayloadEncoding,
    pub logging_level: RequestsLoggingLevel,
    pub request_timeout_sec: u64,
    pub extend_by_ms: u64,
    pub period_ms: u64,
}

/// Where bearer tokens come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    Static(String),
    Command { command: String, timeout: Duration },
    ServiceAccount(PathBuf),
    MetadataServer,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub project_id: String,
    pub endpoint: String,
    pub token_source: TokenSource,
    pub payload_encoding: PayloadEncoding,
    pub logging_level: RequestsLoggingLevel,
    pub request_timeout: Duration,
    pub long_running: LongRunningJobOptions,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();
        let auth = file.auth.unwrap_or_default();

        let access_token = auth.access_token.or_else(|| cli.access_token.clone());
        let token_command = auth.token_command.or_else(|| cli.token_command.clone());
        let credentials_file = auth
            .credentials_file
            .map(PathBuf::from)
            .or_else(|| cli.credentials_file.clone());
        let metadata_server = auth.metadata_server.unwrap_or(cli.metadata_server);
        let token_command_timeout = auth
            .token_command_timeout_sec
            .map(Duration::from_secs)
            .unwrap_or(TOKEN_COMMAND_TIMEOUT);

        if let Some(path) = &credentials_file {
            if !path.is_file() {
                bail!("Credentials file does not exist: {:?}", path);
            }
        }

        let configured = [
            access_token.is_some(),
            token_command.is_some(),
            credentials_file.is_some(),
            metadata_server,
        ]
        .iter()
        .filter(|c| **c)
        .count();
        if configured > 1 {
            warn!("More than one token source configured, using the first of access_token, token_command, credentials_file, metadata_server");
        }

        let token_source = if let Some(token) = access_token {
            TokenSource::Static(token)
        } else if let Some(command) = token_command {
            TokenSource::Command {
                command,
                timeout: token_command_timeout,
            }
        } else if let Some(path) = credentials_file.clone() {
            TokenSource::ServiceAccount(path)
        } else if metadata_server {
            TokenSource::MetadataServer
        } else {
            bail!("No credentials configured: use --access-token, --token-command, --credentials-file or --metadata-server");
        };

        // A service account key carries its own project id.
        let project_id = match file.project_id.or_else(|| cli.project_id.clone()) {
            Some(project_id) => project_id,
            None => match &token_source {
                TokenSource::ServiceAccount(path) => ServiceAccountKey::load(path)?
                    .project_id
                    .context("Service account key has no project_id, use --project-id")?,
                _ => bail!("project_id must be specified via --project-id or in config file"),
            },
        };
        if project_id.trim().is_empty() {
            bail!("project_id must not be empty");
        }

        let endpoint = file
            .endpoint
            .or_else(|| cli.endpoint.clone())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            bail!("Endpoint must be an http(s) URL: {}", endpoint);
        }

        let payload_encoding = match file.payload_encoding {
            Some(s) => parse_payload_encoding(&s)
                .with_context(|| format!("Unknown payload_encoding: {}", s))?,
            None => cli.payload_encoding,
        };

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or(cli.logging_level);

        let request_timeout_sec = file.request_timeout_sec.unwrap_or(cli.request_timeout_sec);
        if request_timeout_sec == 0 {
            bail!("request_timeout_sec must be greater than zero");
        }

        let lr_file = file.long_running.unwrap_or_default();
        let extend_by_ms = lr_file.extend_by_ms.unwrap_or(cli.extend_by_ms);
        let period_ms = lr_file.period_ms.unwrap_or(cli.period_ms);
        if period_ms == 0 {
            bail!("period_ms must be greater than zero");
        }
        if extend_by_ms < 1000 {
            bail!("extend_by_ms must be at least 1000, the deadline is sent in whole seconds");
        }
        if period_ms >= extend_by_ms {
            warn!(
                extend_by_ms,
                period_ms, "Renewal period is not shorter than the extension, deadlines may lapse between renewals"
            );
        }

        Ok(Self {
            project_id,
            endpoint,
            token_source,
            payload_encoding,
            logging_level,
            request_timeout: Duration::from_secs(request_timeout_sec),
            long_running: LongRunningJobOptions::from_millis(extend_by_ms, period_ms),
        })
    }

    pub fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            endpoint: self.endpoint.clone(),
            project_id: self.project_id.clone(),
            request_timeout: self.request_timeout,
            logging_level: self.logging_level,
        }
    }

    pub fn token_provider(&self, http: reqwest::Client) -> Result<Arc<dyn TokenProvider>> {
        let provider: Arc<dyn TokenProvider> = match &self.token_source {
            TokenSource::Static(token) => Arc::new(StaticToken::new(token.clone())),
            TokenSource::Command { command, timeout } => {
                Arc::new(CommandToken::new(command.clone()).with_timeout(*timeout))
            }
            TokenSource::ServiceAccount(path) => {
                let key = ServiceAccountKey::load(path)?;
                Arc::new(ServiceAccountToken::new(http, key))
            }
            TokenSource::MetadataServer => Arc::new(MetadataServerToken::new(http)),
        };
        Ok(provider)
    }

    /// Build an HTTP-backed client from this configuration.
    pub fn build_client(&self) -> Result<Client> {
        let http = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        let token_provider = self.token_provider(http.clone())?;
        let transport =
            HttpTransport::with_client(http, self.transport_config(), token_provider);
        Ok(Client::new(
            Arc::new(transport),
            MessageCodec::new(self.payload_encoding),
        ))
    }
}

fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

fn parse_payload_encoding(s: &str) -> Option<PayloadEncoding> {
    PayloadEncoding::from_str(s, true).ok()
}
