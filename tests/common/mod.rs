//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{http_client, MockPubSubServer, JOBS_SUBSCRIPTION};
//!
//! #[tokio::test]
//! async fn test_pull() {
//!     let server = MockPubSubServer::spawn().await;
//!     let client = http_client(&server);
//!     let result = client.pull(JOBS_SUBSCRIPTION, Default::default()).await.unwrap();
//!     assert!(result.is_empty());
//! }
//! ```

mod constants;
mod mock_pubsub;

#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use mock_pubsub::{MockPubSubServer, RecordedRequest};

use pubsub_jobs::pubsub::{
    AckHandle, Client, HttpTransport, HttpTransportConfig, MessageCodec, ReceivedMessage,
    RequestsLoggingLevel, StaticToken,
};
use std::collections::HashMap;
use std::sync::Arc;

#[allow(dead_code)]
pub fn transport_config(server: &MockPubSubServer) -> HttpTransportConfig {
    HttpTransportConfig {
        endpoint: server.endpoint.clone(),
        logging_level: RequestsLoggingLevel::Body,
        ..HttpTransportConfig::new(PROJECT_ID)
    }
}

/// Client talking HTTP to the mock server with a static token
#[allow(dead_code)]
pub fn http_client(server: &MockPubSubServer) -> Client {
    let transport = HttpTransport::new(
        transport_config(server),
        Arc::new(StaticToken::new(TEST_TOKEN)),
    )
    .expect("Failed to create transport");
    Client::new(Arc::new(transport), MessageCodec::default())
}

/// A delivery as the in-memory transport would hold it
#[allow(dead_code)]
pub fn received(ack_handle: &str, data: &str) -> ReceivedMessage {
    ReceivedMessage {
        ack_handle: AckHandle::from(ack_handle),
        data: data.to_string(),
        attributes: HashMap::new(),
        message_id: None,
        publish_time: None,
    }
}
