use crate::pubsub::AckHandle;
use std::fmt;
use tracing::{debug, warn};

/// Where a long-running job attempt is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Idle,
    Pulling,
    /// The pull came back empty.
    NoMessage,
    /// A message was delivered and its deadline is being renewed.
    Registered,
    Acknowledging,
    Done,
}

impl JobState {
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Idle, Pulling)
                | (Pulling, NoMessage)
                | (Pulling, Registered)
                // pull or initial extension failed
                | (Pulling, Idle)
                | (NoMessage, Idle)
                | (Registered, Acknowledging)
                // cancelled, nacked, or the payload failed to decode
                | (Registered, Idle)
                | (Acknowledging, Done)
                // acknowledge failed; renewals are already stopped
                | (Acknowledging, Idle)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::NoMessage)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Idle => write!(f, "idle"),
            JobState::Pulling => write!(f, "pulling"),
            JobState::NoMessage => write!(f, "no_message"),
            JobState::Registered => write!(f, "registered"),
            JobState::Acknowledging => write!(f, "acknowledging"),
            JobState::Done => write!(f, "done"),
        }
    }
}

/// Tracks one pass through the lifecycle for logging.
#[derive(Debug, Clone)]
pub struct JobAttempt {
    subscription: String,
    ack_handle: Option<AckHandle>,
    state: JobState,
}

impl JobAttempt {
    pub fn new(subscription: &str) -> Self {
        Self {
            subscription: subscription.to_string(),
            ack_handle: None,
            state: JobState::Idle,
        }
    }

    /// Resume tracking a job that was registered by an earlier call.
    pub fn registered(subscription: &str, ack_handle: &AckHandle) -> Self {
        Self {
            subscription: subscription.to_string(),
            ack_handle: Some(ack_handle.clone()),
            state: JobState::Registered,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn set_ack_handle(&mut self, ack_handle: &AckHandle) {
        self.ack_handle = Some(ack_handle.clone());
    }

    /// Move to `next`. Returns false (and leaves the state alone) for an illegal transition.
    pub fn advance(&mut self, next: JobState) -> bool {
        let handle = self.ack_handle.as_ref().map(AckHandle::as_str).unwrap_or("-");
        if !self.state.can_transition_to(next) {
            warn!(
                subscription = %self.subscription,
                ack_handle = %handle,
                from = %self.state,
                to = %next,
                "Illegal job state transition"
            );
            return false;
        }
        debug!(
            subscription = %self.subscription,
            ack_handle = %handle,
            from = %self.state,
            to = %next,
            "Job state transition"
        );
        self.state = next;
        true
    }
}
