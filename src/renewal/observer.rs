use crate::pubsub::{AckHandle, PubSubError};
use tracing::{debug, warn};

/// Receives the outcome of background deadline renewals.
///
/// Called from the renewal task, so implementations must not block.
pub trait RenewalObserver: Send + Sync {
    fn on_renewed(&self, _subscription: &str, _ack_handle: &AckHandle, _tick: u64) {}

    fn on_renewal_failed(
        &self,
        subscription: &str,
        ack_handle: &AckHandle,
        tick: u64,
        error: &PubSubError,
    );
}

/// Default observer: logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RenewalObserver for TracingObserver {
    fn on_renewed(&self, subscription: &str, ack_handle: &AckHandle, tick: u64) {
        debug!(%subscription, %ack_handle, tick, "Ack deadline renewed");
    }

    fn on_renewal_failed(
        &self,
        subscription: &str,
        ack_handle: &AckHandle,
        tick: u64,
        error: &PubSubError,
    ) {
        warn!(
            %subscription,
            %ack_handle,
            tick,
            error = %error,
            "Failed to renew ack deadline, will retry on next tick"
        );
    }
}
