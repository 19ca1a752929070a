//! Ack-deadline renewal for long-running jobs.
//!
//! Each registered ack handle gets one background task that periodically
//! extends the message's ack deadline until the handle is deregistered.

mod observer;
mod scheduler;

pub use observer::{RenewalObserver, TracingObserver};
pub use scheduler::{RegistrationInfo, RenewalScheduler};
