//! Caller-facing facade over the transport, the codec and the job lifecycle.

use super::codec::MessageCodec;
use super::error::{PubSubError, Result};
use super::models::{
    AckHandle, LongRunningJobOptions, Message, OutgoingMessage, PublishResult, PullOptions,
    PullResult,
};
use super::transport::Transport;
use crate::jobs::JobLifecycle;
use crate::renewal::RenewalObserver;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One client per process is typical, but every client owns its own registry
/// of long-running jobs. Dropping the client stops all renewals.
pub struct Client {
    transport: Arc<dyn Transport>,
    codec: MessageCodec,
    jobs: JobLifecycle,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>, codec: MessageCodec) -> Self {
        let jobs = JobLifecycle::new(transport.clone(), codec);
        Self {
            transport,
            codec,
            jobs,
        }
    }

    pub fn with_observer(
        transport: Arc<dyn Transport>,
        codec: MessageCodec,
        observer: Arc<dyn RenewalObserver>,
    ) -> Self {
        let jobs = JobLifecycle::with_observer(transport.clone(), codec, observer);
        Self {
            transport,
            codec,
            jobs,
        }
    }

    pub fn codec(&self) -> MessageCodec {
        self.codec
    }

    pub async fn pull(&self, subscription: &str, options: PullOptions) -> Result<PullResult> {
        if options.max_messages == 0 {
            return Err(PubSubError::InvalidOptions(
                "max_messages must be at least 1".to_string(),
            ));
        }
        let received = self
            .transport
            .pull(subscription, options.return_immediately, options.max_messages)
            .await?;
        debug!(%subscription, count = received.len(), "Pulled messages");

        let messages = received
            .into_iter()
            .map(|r| self.codec.decode_message(r))
            .collect::<Result<Vec<Message>>>()?;
        Ok(PullResult { messages })
    }

    pub async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_handles: &[AckHandle],
        deadline: Duration,
    ) -> Result<()> {
        self.transport
            .modify_ack_deadline(subscription, ack_handles, deadline)
            .await
    }

    pub async fn acknowledge(&self, subscription: &str, ack_handles: &[AckHandle]) -> Result<()> {
        self.transport.acknowledge(subscription, ack_handles).await
    }

    /// Encode and publish a batch in a single call.
    pub async fn publish(&self, topic: &str, messages: &[OutgoingMessage]) -> Result<PublishResult> {
        let wire = self.codec.encode_batch(messages)?;
        let message_ids = self.transport.publish(topic, &wire).await?;
        debug!(%topic, count = message_ids.len(), "Published messages");
        Ok(PublishResult { message_ids })
    }

    pub async fn start_long_running_job(
        &self,
        subscription: &str,
        options: LongRunningJobOptions,
    ) -> Result<Option<Message>> {
        self.jobs.start_long_running_job(subscription, options).await
    }

    pub async fn acknowledge_long_running_job(
        &self,
        subscription: &str,
        ack_handle: &AckHandle,
    ) -> Result<()> {
        self.jobs
            .acknowledge_long_running_job(subscription, ack_handle)
            .await
    }

    pub fn cancel_long_running_job(&self, ack_handle: &AckHandle) -> bool {
        self.jobs.cancel_long_running_job(ack_handle)
    }

    pub async fn nack_long_running_job(
        &self,
        subscription: &str,
        ack_handle: &AckHandle,
    ) -> Result<()> {
        self.jobs.nack_long_running_job(subscription, ack_handle).await
    }

    pub fn active_jobs(&self) -> Vec<AckHandle> {
        self.jobs.active_jobs()
    }

    /// Stop every renewal. Jobs still in flight are redelivered once their deadlines lapse.
    pub fn shutdown(&self) -> usize {
        self.jobs.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::{InMemoryTransport, Payload, PayloadEncoding, TransportCall};

    fn client(transport: &Arc<InMemoryTransport>) -> Client {
        Client::new(transport.clone(), MessageCodec::default())
    }

    #[tokio::test]
    async fn test_publish_then_pull() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.bind("events", "events-sub");
        let client = client(&transport);

        let published = client
            .publish(
                "events",
                &[
                    OutgoingMessage::new("first").with_attribute("n", "1"),
                    OutgoingMessage::new(""),
                ],
            )
            .await
            .unwrap();
        assert_eq!(published.message_ids.len(), 2);

        let pulled = client
            .pull(
                "events-sub",
                PullOptions {
                    return_immediately: true,
                    max_messages: 10,
                },
            )
            .await
            .unwrap();
        assert_eq!(pulled.messages.len(), 2);
        assert_eq!(pulled.messages[0].payload, Payload::Text("first".to_string()));
        assert_eq!(
            pulled.messages[0].attributes.get("n").map(String::as_str),
            Some("1")
        );
        assert_eq!(pulled.messages[1].payload, Payload::Text(String::new()));

        client
            .acknowledge("events-sub", &pulled.ack_handles())
            .await
            .unwrap();
        assert!(transport.is_acknowledged(&pulled.messages[0].ack_handle));
    }

    #[tokio::test]
    async fn test_publish_encodes_every_message() {
        let transport = Arc::new(InMemoryTransport::new());
        let client = client(&transport);

        client
            .publish(
                "events",
                &[
                    OutgoingMessage::new("hello"),
                    OutgoingMessage::new(vec![0u8, 255]),
                ],
            )
            .await
            .unwrap();

        match &transport.calls()[0] {
            TransportCall::Publish { topic, messages } => {
                assert_eq!(topic, "events");
                assert_eq!(messages[0].data, "aGVsbG8=");
                assert_eq!(messages[1].data, "AP8=");
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_encode_error_makes_no_call() {
        let transport = Arc::new(InMemoryTransport::new());
        let client = Client::new(
            transport.clone(),
            MessageCodec::new(PayloadEncoding::TextLatin1),
        );

        let err = client
            .publish("events", &[OutgoingMessage::new("ok"), OutgoingMessage::new("€")])
            .await
            .unwrap_err();
        assert!(matches!(err, PubSubError::Encode(_)));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pull_rejects_zero_max_messages() {
        let transport = Arc::new(InMemoryTransport::new());
        let client = client(&transport);

        let err = client
            .pull(
                "s",
                PullOptions {
                    return_immediately: true,
                    max_messages: 0,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PubSubError::InvalidOptions(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_renewals() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.bind("jobs", "jobs-sub");
        let client = client(&transport);
        client
            .publish("jobs", &[OutgoingMessage::new("work")])
            .await
            .unwrap();

        let message = client
            .start_long_running_job("jobs-sub", LongRunningJobOptions::from_millis(15_000, 10_000))
            .await
            .unwrap()
            .unwrap();
        drop(client);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.deadline_extensions(&message.ack_handle).len(), 1);
    }
}
