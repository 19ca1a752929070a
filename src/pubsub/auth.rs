//! Access token acquisition.
//!
//! Kept apart from request construction so the transport can be tested with a
//! mocked provider and so token caching lives in one place.

use super::error::{PubSubError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// OAuth scope granting access to the Pub/Sub API.
pub const PUBSUB_SCOPE: &str = "https://www.googleapis.com/auth/pubsub";

/// Default GCE metadata endpoint for the instance's default service account.
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Default timeout for token commands.
pub const TOKEN_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Source of bearer tokens for the transport.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get a bearer token valid for at least the next request.
    async fn get_access_token(&self) -> Result<String>;
}

/// A fixed token, e.g. for emulators or tokens minted out of band.
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn get_access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Shell command whose stdout is the token (for example `gcloud auth print-access-token`).
///
/// The command runs before every request, so rotation is handled by the command itself.
pub struct CommandToken {
    command: String,
    timeout: Duration,
}

impl CommandToken {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: TOKEN_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TokenProvider for CommandToken {
    async fn get_access_token(&self) -> Result<String> {
        let cmd = &self.command;
        debug!(command = %cmd, "Fetching access token via command");

        let result =
            tokio::time::timeout(self.timeout, Command::new("sh").arg("-c").arg(cmd).output())
                .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(command = %cmd, error = %e, "token command failed to execute");
                return Err(PubSubError::Auth(format!(
                    "Failed to execute token command: {}",
                    e
                )));
            }
            Err(_) => {
                warn!(command = %cmd, "token command timed out");
                return Err(PubSubError::Auth(format!(
                    "Token command timed out after {:?}",
                    self.timeout
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(command = %cmd, stderr = %stderr, "token command failed");
            return Err(PubSubError::Auth(format!(
                "Token command failed with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(PubSubError::Auth(
                "Token command returned an empty token".to_string(),
            ));
        }

        Ok(token)
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            token: response.access_token,
            expires_at: now + ChronoDuration::seconds(response.expires_in),
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

async fn read_token_response(response: reqwest::Response) -> Result<TokenResponse> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PubSubError::Auth(format!(
            "Token endpoint returned status {}: {}",
            status, body
        )));
    }
    response
        .json()
        .await
        .map_err(|e| PubSubError::Auth(format!("Invalid token response: {}", e)))
}

/// Token from the GCE / GKE metadata server, cached until shortly before expiry.
pub struct MetadataServerToken {
    client: reqwest::Client,
    url: String,
    cache: Mutex<Option<CachedToken>>,
}

impl MetadataServerToken {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_url(client, METADATA_TOKEN_URL)
    }

    pub fn with_url(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            cache: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TokenProvider for MetadataServerToken {
    async fn get_access_token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        let now = Utc::now();
        if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh(now)) {
            return Ok(cached.token.clone());
        }

        debug!(url = %self.url, "Fetching access token from metadata server");
        let response = self
            .client
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| PubSubError::Auth(format!("Metadata server unreachable: {}", e)))?;

        let cached = CachedToken::from_response(read_token_response(response).await?, now);
        let token = cached.token.clone();
        *cache = Some(cached);
        Ok(token)
    }
}

/// Fields of a service account JSON key used for the JWT bearer grant.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PubSubError::Auth(format!("Failed to read service account key {:?}: {}", path, e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            PubSubError::Auth(format!("Invalid service account key {:?}: {}", path, e))
        })
    }
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Exchanges a self-signed JWT for an access token, cached until shortly before expiry.
pub struct ServiceAccountToken {
    client: reqwest::Client,
    key: ServiceAccountKey,
    scope: String,
    cache: Mutex<Option<CachedToken>>,
}

impl ServiceAccountToken {
    pub fn new(client: reqwest::Client, key: ServiceAccountKey) -> Self {
        Self {
            client,
            key,
            scope: PUBSUB_SCOPE.to_string(),
            cache: Mutex::new(None),
        }
    }

    fn signed_assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let iat = now.timestamp();
        let claims = JwtClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat,
            exp: iat + 3600,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| PubSubError::Auth(format!("Invalid service account private key: {}", e)))?;

        jsonwebtoken::encode(&header, &claims, &encoding_key)
            .map_err(|e| PubSubError::Auth(format!("Failed to sign JWT assertion: {}", e)))
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountToken {
    async fn get_access_token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        let now = Utc::now();
        if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh(now)) {
            return Ok(cached.token.clone());
        }

        let assertion = self.signed_assertion(now)?;
        debug!(
            client_email = %self.key.client_email,
            token_uri = %self.key.token_uri,
            "Exchanging service account assertion for access token"
        );

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .send()
            .await
            .map_err(|e| PubSubError::Auth(format!("Token endpoint unreachable: {}", e)))?;

        let cached = CachedToken::from_response(read_token_response(response).await?, now);
        let token = cached.token.clone();
        *cache = Some(cached);
        Ok(token)
    }
}
