//! HTTP/JSON transport for the Pub/Sub REST v1 API.

use super::auth::TokenProvider;
use super::error::{PubSubError, Result};
use super::models::{ack_deadline_seconds, AckHandle, ReceivedMessage, WireMessage};
use super::transport::Transport;
use crate::metrics;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com/v1";

const MAX_LOGGABLE_BODY_LENGTH: usize = 1024;

#[derive(PartialEq, PartialOrd, Clone, Copy, Debug, Default, clap::ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    #[default]
    Path,
    Body,
}

impl std::fmt::Display for RequestsLoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Base API URL, e.g. "https://pubsub.googleapis.com/v1" or an emulator address.
    pub endpoint: String,
    pub project_id: String,
    pub request_timeout: Duration,
    pub logging_level: RequestsLoggingLevel,
}

impl HttpTransportConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            project_id: project_id.into(),
            request_timeout: Duration::from_secs(60),
            logging_level: RequestsLoggingLevel::default(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    return_immediately: bool,
    max_messages: u32,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<WireReceivedMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceivedMessage {
    ack_id: String,
    message: WirePubsubMessage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePubsubMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    publish_time: Option<String>,
}

impl From<WireReceivedMessage> for ReceivedMessage {
    fn from(wire: WireReceivedMessage) -> Self {
        ReceivedMessage {
            ack_handle: AckHandle::from(wire.ack_id),
            data: wire.message.data,
            attributes: wire.message.attributes,
            message_id: wire.message.message_id,
            publish_time: wire.message.publish_time,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyAckDeadlineRequest<'a> {
    ack_ids: &'a [AckHandle],
    ack_deadline_seconds: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: &'a [AckHandle],
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    messages: &'a [WireMessage],
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Deserialize)]
struct GoogleError {
    #[serde(default)]
    message: String,
}

/// Extracts the human-readable part of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<GoogleErrorBody>(body)
        .map(|b| b.error.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string())
}

fn truncate_for_log(body: &str) -> &str {
    match body.char_indices().nth(MAX_LOGGABLE_BODY_LENGTH) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Transport speaking the Pub/Sub REST API with bearer-token auth.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    project_id: String,
    logging_level: RequestsLoggingLevel,
    token_provider: Arc<dyn TokenProvider>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig, token_provider: Arc<dyn TokenProvider>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PubSubError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, config, token_provider))
    }

    pub fn with_client(
        client: Client,
        config: HttpTransportConfig,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            project_id: config.project_id,
            logging_level: config.logging_level,
            token_provider,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Full resource path. Names already of the form `projects/...` are used as given.
    fn resource_path(&self, collection: &str, name: &str) -> String {
        if name.starts_with("projects/") {
            name.to_string()
        } else {
            format!(
                "projects/{}/{}/{}",
                urlencoding::encode(&self.project_id),
                collection,
                urlencoding::encode(name)
            )
        }
    }

    fn subscription_url(&self, subscription: &str, action: &str) -> String {
        format!(
            "{}/{}:{}",
            self.endpoint,
            self.resource_path("subscriptions", subscription),
            action
        )
    }

    fn topic_url(&self, topic: &str, action: &str) -> String {
        format!(
            "{}/{}:{}",
            self.endpoint,
            self.resource_path("topics", topic),
            action
        )
    }

    async fn post_json<B, R>(&self, operation: &'static str, url: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Default,
    {
        let token = self.token_provider.get_access_token().await?;
        let start = Instant::now();

        if self.logging_level > RequestsLoggingLevel::None {
            info!(">>> POST {}", url);
        }
        if self.logging_level >= RequestsLoggingLevel::Body {
            if let Ok(json) = serde_json::to_string(body) {
                debug!(operation, body = %truncate_for_log(&json), "request body");
            }
        }

        let result = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                metrics::record_transport_call(operation, "error", start.elapsed());
                warn!(operation, error = %e, "request failed");
                return Err(PubSubError::from(e));
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                metrics::record_transport_call(operation, "error", start.elapsed());
                warn!(operation, error = %e, "failed to read response body");
                return Err(PubSubError::from(e));
            }
        };
        metrics::record_transport_call(operation, status.as_str(), start.elapsed());

        if self.logging_level > RequestsLoggingLevel::None {
            info!("<<< {} {} ({:?})", status.as_u16(), url, start.elapsed());
        }
        if self.logging_level >= RequestsLoggingLevel::Body {
            debug!(operation, body = %truncate_for_log(&text), "response body");
        }

        if !status.is_success() {
            return Err(PubSubError::Api {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        if text.trim().is_empty() {
            return Ok(R::default());
        }
        serde_json::from_str(&text)
            .map_err(|e| PubSubError::InvalidResponse(format!("{} response: {}", operation, e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn pull(
        &self,
        subscription: &str,
        return_immediately: bool,
        max_messages: u32,
    ) -> Result<Vec<ReceivedMessage>> {
        let url = self.subscription_url(subscription, "pull");
        let request = PullRequest {
            return_immediately,
            max_messages,
        };
        let response: PullResponse = self.post_json("pull", &url, &request).await?;
        Ok(response
            .received_messages
            .into_iter()
            .map(ReceivedMessage::from)
            .collect())
    }

    async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_handles: &[AckHandle],
        deadline: Duration,
    ) -> Result<()> {
        if ack_handles.is_empty() {
            return Ok(());
        }
        let url = self.subscription_url(subscription, "modifyAckDeadline");
        let request = ModifyAckDeadlineRequest {
            ack_ids: ack_handles,
            ack_deadline_seconds: ack_deadline_seconds(deadline),
        };
        let _: serde_json::Value = self
            .post_json("modify_ack_deadline", &url, &request)
            .await?;
        Ok(())
    }

    async fn acknowledge(&self, subscription: &str, ack_handles: &[AckHandle]) -> Result<()> {
        if ack_handles.is_empty() {
            return Ok(());
        }
        let url = self.subscription_url(subscription, "acknowledge");
        let request = AcknowledgeRequest {
            ack_ids: ack_handles,
        };
        let _: serde_json::Value = self.post_json("acknowledge", &url, &request).await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, messages: &[WireMessage]) -> Result<Vec<String>> {
        let url = self.topic_url(topic, "publish");
        let response: PublishResponse = self
            .post_json("publish", &url, &PublishRequest { messages })
            .await?;

        if response.message_ids.len() != messages.len() {
            return Err(PubSubError::InvalidResponse(format!(
                "publish returned {} ids for {} messages",
                response.message_ids.len(),
                messages.len()
            )));
        }
        Ok(response.message_ids)
    }
}
