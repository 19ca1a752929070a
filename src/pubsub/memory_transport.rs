//! In-process transport for local development and tests.
//!
//! Messages published to a topic fan out to every bound subscription. Every
//! call is recorded so callers can assert on the exact traffic.

use super::error::{PubSubError, Result};
use super::models::{AckHandle, ReceivedMessage, WireMessage};
use super::transport::Transport;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Pull,
    ModifyAckDeadline,
    Acknowledge,
    Publish,
}

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Pull {
        subscription: String,
        return_immediately: bool,
        max_messages: u32,
    },
    ModifyAckDeadline {
        subscription: String,
        ack_handles: Vec<AckHandle>,
        deadline: Duration,
    },
    Acknowledge {
        subscription: String,
        ack_handles: Vec<AckHandle>,
    },
    Publish {
        topic: String,
        messages: Vec<WireMessage>,
    },
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, VecDeque<ReceivedMessage>>,
    bindings: HashMap<String, Vec<String>>,
    outstanding: HashMap<AckHandle, ReceivedMessage>,
    acknowledged: HashSet<AckHandle>,
    failing: HashSet<Operation>,
    calls: Vec<TransportCall>,
    next_id: u64,
    redeliveries: u64,
}

#[derive(Default)]
pub struct InMemoryTransport {
    inner: Mutex<Inner>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route messages published to `topic` into `subscription`.
    pub fn bind(&self, topic: &str, subscription: &str) {
        let mut inner = self.inner();
        inner
            .bindings
            .entry(topic.to_string())
            .or_default()
            .push(subscription.to_string());
        inner.queues.entry(subscription.to_string()).or_default();
    }

    /// Put a delivery directly on a subscription queue.
    pub fn push(&self, subscription: &str, message: ReceivedMessage) {
        self.inner()
            .queues
            .entry(subscription.to_string())
            .or_default()
            .push_back(message);
    }

    /// Make every call of `operation` fail with a transport error until [`Self::recover`].
    pub fn fail(&self, operation: Operation) {
        self.inner().failing.insert(operation);
    }

    pub fn recover(&self, operation: Operation) {
        self.inner().failing.remove(&operation);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.inner().calls.clone()
    }

    /// Deadlines requested for `ack_handle`, in call order.
    pub fn deadline_extensions(&self, ack_handle: &AckHandle) -> Vec<Duration> {
        self.inner()
            .calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::ModifyAckDeadline {
                    ack_handles,
                    deadline,
                    ..
                } if ack_handles.contains(ack_handle) => Some(*deadline),
                _ => None,
            })
            .collect()
    }

    /// Number of acknowledge calls that included `ack_handle`.
    pub fn acknowledge_count(&self, ack_handle: &AckHandle) -> usize {
        self.inner()
            .calls
            .iter()
            .filter(|c| {
                matches!(c, TransportCall::Acknowledge { ack_handles, .. } if ack_handles.contains(ack_handle))
            })
            .count()
    }

    pub fn is_acknowledged(&self, ack_handle: &AckHandle) -> bool {
        self.inner().acknowledged.contains(ack_handle)
    }

    pub fn queued(&self, subscription: &str) -> usize {
        self.inner().queues.get(subscription).map_or(0, VecDeque::len)
    }

    fn check(inner: &Inner, operation: Operation) -> Result<()> {
        if inner.failing.contains(&operation) {
            return Err(PubSubError::Transport(format!(
                "injected failure for {:?}",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn pull(
        &self,
        subscription: &str,
        return_immediately: bool,
        max_messages: u32,
    ) -> Result<Vec<ReceivedMessage>> {
        let mut inner = self.inner();
        inner.calls.push(TransportCall::Pull {
            subscription: subscription.to_string(),
            return_immediately,
            max_messages,
        });
        Self::check(&inner, Operation::Pull)?;

        let queue = inner.queues.entry(subscription.to_string()).or_default();
        let count = queue.len().min(max_messages as usize);
        let delivered: Vec<ReceivedMessage> = queue.drain(..count).collect();
        for message in &delivered {
            inner
                .outstanding
                .insert(message.ack_handle.clone(), message.clone());
        }
        Ok(delivered)
    }

    async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_handles: &[AckHandle],
        deadline: Duration,
    ) -> Result<()> {
        let mut inner = self.inner();
        inner.calls.push(TransportCall::ModifyAckDeadline {
            subscription: subscription.to_string(),
            ack_handles: ack_handles.to_vec(),
            deadline,
        });
        Self::check(&inner, Operation::ModifyAckDeadline)?;

        // A zero deadline hands the message straight back to the queue. The
        // redelivery gets its own ack handle, the old one is dead.
        if deadline.is_zero() {
            for handle in ack_handles {
                if let Some(mut message) = inner.outstanding.remove(handle) {
                    inner.redeliveries += 1;
                    message.ack_handle =
                        AckHandle::new(format!("{}-r{}", handle, inner.redeliveries));
                    inner
                        .queues
                        .entry(subscription.to_string())
                        .or_default()
                        .push_back(message);
                }
            }
        }
        Ok(())
    }

    async fn acknowledge(&self, subscription: &str, ack_handles: &[AckHandle]) -> Result<()> {
        let mut inner = self.inner();
        inner.calls.push(TransportCall::Acknowledge {
            subscription: subscription.to_string(),
            ack_handles: ack_handles.to_vec(),
        });
        Self::check(&inner, Operation::Acknowledge)?;

        for handle in ack_handles {
            inner.outstanding.remove(handle);
            inner.acknowledged.insert(handle.clone());
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, messages: &[WireMessage]) -> Result<Vec<String>> {
        let mut inner = self.inner();
        inner.calls.push(TransportCall::Publish {
            topic: topic.to_string(),
            messages: messages.to_vec(),
        });
        Self::check(&inner, Operation::Publish)?;

        let subscriptions = inner.bindings.get(topic).cloned().unwrap_or_default();
        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            inner.next_id += 1;
            let message_id = inner.next_id.to_string();
            for subscription in &subscriptions {
                let received = ReceivedMessage {
                    ack_handle: AckHandle::new(format!("{}-{}", subscription, message_id)),
                    data: message.data.clone(),
                    attributes: message.attributes.clone(),
                    message_id: Some(message_id.clone()),
                    publish_time: None,
                };
                inner
                    .queues
                    .entry(subscription.clone())
                    .or_default()
                    .push_back(received);
            }
            ids.push(message_id);
        }
        Ok(ids)
    }
}
