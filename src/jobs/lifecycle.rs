use super::state::{JobAttempt, JobState};
use crate::metrics;
use crate::pubsub::{
    AckHandle, LongRunningJobOptions, Message, MessageCodec, Result, Transport,
};
use crate::renewal::{RenewalObserver, RenewalScheduler, TracingObserver};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pulls one message at a time and keeps its ack deadline alive until the
/// caller acknowledges, cancels or nacks it.
pub struct JobLifecycle {
    transport: Arc<dyn Transport>,
    codec: MessageCodec,
    scheduler: RenewalScheduler,
}

impl JobLifecycle {
    pub fn new(transport: Arc<dyn Transport>, codec: MessageCodec) -> Self {
        Self::with_observer(transport, codec, Arc::new(TracingObserver))
    }

    pub fn with_observer(
        transport: Arc<dyn Transport>,
        codec: MessageCodec,
        observer: Arc<dyn RenewalObserver>,
    ) -> Self {
        let scheduler = RenewalScheduler::with_observer(transport.clone(), observer);
        Self {
            transport,
            codec,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &RenewalScheduler {
        &self.scheduler
    }

    /// Pull a single message and start renewing its deadline.
    ///
    /// Returns `Ok(None)` when the subscription has nothing to deliver. When a
    /// message is returned its deadline has already been extended once.
    pub async fn start_long_running_job(
        &self,
        subscription: &str,
        options: LongRunningJobOptions,
    ) -> Result<Option<Message>> {
        let mut attempt = JobAttempt::new(subscription);
        attempt.advance(JobState::Pulling);

        let mut received = match self.transport.pull(subscription, true, 1).await {
            Ok(received) => received,
            Err(e) => {
                attempt.advance(JobState::Idle);
                return Err(e);
            }
        };

        if received.is_empty() {
            attempt.advance(JobState::NoMessage);
            metrics::record_job_event("empty");
            debug!(%subscription, "No message available for long-running job");
            return Ok(None);
        }
        if received.len() > 1 {
            warn!(
                %subscription,
                count = received.len(),
                "Pull returned more than one message, processing only the first"
            );
        }
        let first = received.swap_remove(0);
        let ack_handle = first.ack_handle.clone();
        attempt.set_ack_handle(&ack_handle);

        if let Err(e) = self
            .scheduler
            .register(subscription, &ack_handle, options.extend_by, options.period)
            .await
        {
            attempt.advance(JobState::Idle);
            return Err(e);
        }
        attempt.advance(JobState::Registered);

        match self.codec.decode_message(first) {
            Ok(message) => {
                metrics::record_job_event("started");
                info!(%subscription, %ack_handle, "Started long-running job");
                Ok(Some(message))
            }
            Err(e) => {
                self.scheduler.deregister(&ack_handle);
                attempt.advance(JobState::Idle);
                warn!(
                    %subscription,
                    %ack_handle,
                    error = %e,
                    "Dropping long-running job with undecodable payload"
                );
                Err(e)
            }
        }
    }

    /// Stop renewals for `ack_handle`, then acknowledge it.
    ///
    /// Handles without an active registration are still acknowledged; whatever
    /// the transport reports for an unknown or expired handle is returned as is.
    pub async fn acknowledge_long_running_job(
        &self,
        subscription: &str,
        ack_handle: &AckHandle,
    ) -> Result<()> {
        let mut attempt = JobAttempt::registered(subscription, ack_handle);
        let was_registered = self.scheduler.deregister(ack_handle);
        attempt.advance(JobState::Acknowledging);

        if let Err(e) = self
            .transport
            .acknowledge(subscription, std::slice::from_ref(ack_handle))
            .await
        {
            attempt.advance(JobState::Idle);
            return Err(e);
        }

        attempt.advance(JobState::Done);
        metrics::record_job_event("acknowledged");
        info!(%subscription, %ack_handle, was_registered, "Acknowledged long-running job");
        Ok(())
    }

    /// Stop renewals without acknowledging. The broker redelivers the message
    /// once the last extended deadline lapses.
    pub fn cancel_long_running_job(&self, ack_handle: &AckHandle) -> bool {
        let cancelled = self.scheduler.deregister(ack_handle);
        if cancelled {
            metrics::record_job_event("cancelled");
            info!(%ack_handle, "Cancelled long-running job");
        }
        cancelled
    }

    /// Stop renewals and hand the message back for immediate redelivery.
    pub async fn nack_long_running_job(
        &self,
        subscription: &str,
        ack_handle: &AckHandle,
    ) -> Result<()> {
        let mut attempt = JobAttempt::registered(subscription, ack_handle);
        self.scheduler.deregister(ack_handle);
        attempt.advance(JobState::Idle);

        self.transport
            .modify_ack_deadline(
                subscription,
                std::slice::from_ref(ack_handle),
                Duration::ZERO,
            )
            .await?;
        metrics::record_job_event("nacked");
        info!(%subscription, %ack_handle, "Returned long-running job to the subscription");
        Ok(())
    }

    /// Handles currently being renewed, sorted.
    pub fn active_jobs(&self) -> Vec<AckHandle> {
        self.scheduler.registered_handles()
    }

    pub fn shutdown(&self) -> usize {
        self.scheduler.shutdown()
    }
}
