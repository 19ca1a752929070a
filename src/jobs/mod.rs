//! Long-running job lifecycle: pull one message, renew its deadline while the
//! caller works on it, then acknowledge.

mod lifecycle;
mod state;

pub use lifecycle::JobLifecycle;
pub use state::{JobAttempt, JobState};
