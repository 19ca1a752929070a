//! Pub/Sub client for long-running jobs.
//!
//! Pulls one message at a time and keeps its ack deadline extended in the
//! background until the job is acknowledged.

pub mod config;
pub mod jobs;
pub mod metrics;
pub mod pubsub;
pub mod renewal;

// Re-export commonly used types for convenience
pub use jobs::JobLifecycle;
pub use pubsub::{
    AckHandle, Client, LongRunningJobOptions, Message, MessageCodec, OutgoingMessage, Payload,
    PayloadEncoding, PubSubError, Transport,
};
pub use renewal::{RenewalObserver, RenewalScheduler};
