//! Pub/Sub client: transport, auth, payload codec and the caller-facing `Client`.

pub mod auth;
mod client;
mod codec;
mod error;
pub mod http_transport;
mod memory_transport;
mod models;
mod transport;

pub use auth::{
    CommandToken, MetadataServerToken, ServiceAccountKey, ServiceAccountToken, StaticToken,
    TokenProvider,
};
#[cfg(any(test, feature = "mock"))]
pub use auth::MockTokenProvider;
pub use client::Client;
pub use codec::{MessageCodec, PayloadEncoding};
pub use error::{PubSubError, Result};
pub use http_transport::{HttpTransport, HttpTransportConfig, RequestsLoggingLevel};
pub use memory_transport::{InMemoryTransport, Operation, TransportCall};
pub use models::{
    ack_deadline_seconds, AckHandle, LongRunningJobOptions, Message, OutgoingMessage, Payload,
    PublishResult, PullOptions, PullResult, ReceivedMessage, WireMessage,
};
pub use transport::Transport;
