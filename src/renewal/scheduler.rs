//! Periodic ack-deadline renewal, one task per registered ack handle.

use super::observer::{RenewalObserver, TracingObserver};
use crate::metrics;
use crate::pubsub::{AckHandle, PubSubError, Result, Transport};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A registered long-running job. Dropping it stops its renewal task.
struct JobRegistration {
    subscription: String,
    extend_by: Duration,
    period: Duration,
    registered_at: Instant,
    /// Distinguishes this registration from a later one for the same handle.
    generation: u64,
    cancel_token: CancellationToken,
    /// `None` while the initial extension is in flight.
    task: Option<JoinHandle<()>>,
}

impl Drop for JobRegistration {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Read-only view of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub ack_handle: AckHandle,
    pub subscription: String,
    pub extend_by: Duration,
    pub period: Duration,
    pub registered_at: Instant,
    pub renewing: bool,
}

/// Owns the registry of in-flight long-running jobs and their renewal tasks.
///
/// At most one registration exists per ack handle; registering a handle that
/// is already tracked fails with [`PubSubError::DuplicateRegistration`].
pub struct RenewalScheduler {
    transport: Arc<dyn Transport>,
    observer: Arc<dyn RenewalObserver>,
    registry: Mutex<HashMap<AckHandle, JobRegistration>>,
    next_generation: AtomicU64,
}

/// Releases a reservation if `register` does not complete.
struct Reservation<'a> {
    scheduler: &'a RenewalScheduler,
    ack_handle: &'a AckHandle,
    generation: u64,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.scheduler
                .remove_generation(self.ack_handle, self.generation);
        }
    }
}

impl RenewalScheduler {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_observer(transport, Arc::new(TracingObserver))
    }

    pub fn with_observer(
        transport: Arc<dyn Transport>,
        observer: Arc<dyn RenewalObserver>,
    ) -> Self {
        Self {
            transport,
            observer,
            registry: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<AckHandle, JobRegistration>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start renewing the deadline of `ack_handle`.
    ///
    /// The first extension is performed before this returns; if it fails the
    /// handle is left unregistered and the error is returned. Afterwards the
    /// deadline is extended by `extend_by` every `period`.
    pub async fn register(
        &self,
        subscription: &str,
        ack_handle: &AckHandle,
        extend_by: Duration,
        period: Duration,
    ) -> Result<()> {
        if period.is_zero() {
            return Err(PubSubError::InvalidOptions(
                "renewal period must be greater than zero".to_string(),
            ));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel_token = CancellationToken::new();
        {
            let mut registry = self.registry();
            if registry.contains_key(ack_handle) {
                return Err(PubSubError::DuplicateRegistration(ack_handle.clone()));
            }
            registry.insert(
                ack_handle.clone(),
                JobRegistration {
                    subscription: subscription.to_string(),
                    extend_by,
                    period,
                    registered_at: Instant::now(),
                    generation,
                    cancel_token: cancel_token.clone(),
                    task: None,
                },
            );
            metrics::inc_active_jobs();
        }
        let mut reservation = Reservation {
            scheduler: self,
            ack_handle,
            generation,
            armed: true,
        };

        let initial = self
            .transport
            .modify_ack_deadline(subscription, std::slice::from_ref(ack_handle), extend_by)
            .await;
        metrics::record_renewal(initial.is_ok());
        initial?;

        reservation.armed = false;
        let mut registry = self.registry();
        match registry.get_mut(ack_handle) {
            Some(registration) if registration.generation == generation => {
                registration.task = Some(tokio::spawn(renewal_loop(
                    self.transport.clone(),
                    self.observer.clone(),
                    subscription.to_string(),
                    ack_handle.clone(),
                    extend_by,
                    period,
                    cancel_token,
                )));
                info!(
                    %subscription,
                    %ack_handle,
                    extend_by_ms = extend_by.as_millis() as u64,
                    period_ms = period.as_millis() as u64,
                    "Registered long-running job"
                );
            }
            // Deregistered while the initial extension was in flight.
            _ => debug!(%ack_handle, "Registration removed before renewals started"),
        }
        Ok(())
    }

    /// Stop renewing `ack_handle`. Returns false if it was not registered.
    pub fn deregister(&self, ack_handle: &AckHandle) -> bool {
        let removed = self.registry().remove(ack_handle);

        match removed {
            Some(registration) => {
                metrics::dec_active_jobs(1);
                debug!(
                    %ack_handle,
                    elapsed_ms = registration.registered_at.elapsed().as_millis() as u64,
                    "Deregistered long-running job"
                );
                true
            }
            None => {
                debug!(%ack_handle, "Deregister of untracked ack handle ignored");
                false
            }
        }
    }

    fn remove_generation(&self, ack_handle: &AckHandle, generation: u64) {
        let mut registry = self.registry();
        if registry
            .get(ack_handle)
            .is_some_and(|r| r.generation == generation)
        {
            registry.remove(ack_handle);
            metrics::dec_active_jobs(1);
        }
    }

    pub fn is_registered(&self, ack_handle: &AckHandle) -> bool {
        self.registry().contains_key(ack_handle)
    }

    pub fn active_count(&self) -> usize {
        self.registry().len()
    }

    pub fn registered_handles(&self) -> Vec<AckHandle> {
        let mut handles: Vec<AckHandle> = self.registry().keys().cloned().collect();
        handles.sort();
        handles
    }

    pub fn registration(&self, ack_handle: &AckHandle) -> Option<RegistrationInfo> {
        self.registry().get(ack_handle).map(|r| RegistrationInfo {
            ack_handle: ack_handle.clone(),
            subscription: r.subscription.clone(),
            extend_by: r.extend_by,
            period: r.period,
            registered_at: r.registered_at,
            renewing: r.task.as_ref().is_some_and(|t| !t.is_finished()),
        })
    }

    /// Stop every renewal task. Returns how many registrations were dropped.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<JobRegistration> = {
            let mut registry = self.registry();
            registry.drain().map(|(_, r)| r).collect()
        };
        metrics::dec_active_jobs(drained.len());
        if !drained.is_empty() {
            info!(count = drained.len(), "Stopped renewals of in-flight long-running jobs");
        }
        drained.len()
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Extends the deadline every `period` until cancelled.
///
/// A renewal is awaited before the next tick is taken and missed ticks are
/// skipped, so renewals of one handle never overlap.
async fn renewal_loop(
    transport: Arc<dyn Transport>,
    observer: Arc<dyn RenewalObserver>,
    subscription: String,
    ack_handle: AckHandle,
    extend_by: Duration,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let handles = [ack_handle.clone()];
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tick += 1;
        let result = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            result = transport.modify_ack_deadline(&subscription, &handles, extend_by) => result,
        };

        metrics::record_renewal(result.is_ok());
        match result {
            Ok(()) => observer.on_renewed(&subscription, &ack_handle, tick),
            Err(e) => observer.on_renewal_failed(&subscription, &ack_handle, tick, &e),
        }
    }

    debug!(%ack_handle, ticks = tick, "Renewal loop stopped");
}
