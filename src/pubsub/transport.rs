//! The network seam the client core depends on.

use super::error::Result;
use super::models::{AckHandle, ReceivedMessage, WireMessage};
use async_trait::async_trait;
use std::time::Duration;

/// Authenticated calls against the message queue.
///
/// Implementations perform exactly one round trip per call and never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Pull up to `max_messages` messages from a subscription.
    async fn pull(
        &self,
        subscription: &str,
        return_immediately: bool,
        max_messages: u32,
    ) -> Result<Vec<ReceivedMessage>>;

    /// Set the ack deadline of the given deliveries to `deadline` from now.
    ///
    /// The wire value is whole seconds; see [`super::models::ack_deadline_seconds`].
    async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_handles: &[AckHandle],
        deadline: Duration,
    ) -> Result<()>;

    /// Acknowledge the given deliveries.
    async fn acknowledge(&self, subscription: &str, ack_handles: &[AckHandle]) -> Result<()>;

    /// Publish already-encoded messages to a topic, returning their ids in order.
    async fn publish(&self, topic: &str, messages: &[WireMessage]) -> Result<Vec<String>>;
}
