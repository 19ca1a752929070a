//! Error type shared by the transport, the codec and the job lifecycle.

use super::models::AckHandle;
use thiserror::Error;

/// Errors that can occur when talking to the message queue.
#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to decode payload: {0}")]
    Decode(String),

    #[error("Failed to encode payload: {0}")]
    Encode(String),

    #[error("Ack handle {0} already has an active long-running job")]
    DuplicateRegistration(AckHandle),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

impl PubSubError {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            PubSubError::Auth(_) => "auth",
            PubSubError::Transport(_) => "transport",
            PubSubError::Api { .. } => "api",
            PubSubError::InvalidResponse(_) => "invalid_response",
            PubSubError::Decode(_) => "decode",
            PubSubError::Encode(_) => "encode",
            PubSubError::DuplicateRegistration(_) => "duplicate_registration",
            PubSubError::InvalidOptions(_) => "invalid_options",
        }
    }

    /// True for failures that happened on the wire (network, HTTP status, auth).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            PubSubError::Auth(_) | PubSubError::Transport(_) | PubSubError::Api { .. }
        )
    }
}

impl From<reqwest::Error> for PubSubError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            PubSubError::InvalidResponse(e.to_string())
        } else {
            PubSubError::Transport(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, PubSubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PubSubError::Api {
            status: 404,
            message: "Subscription not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "API error (status 404): Subscription not found"
        );

        let err = PubSubError::DuplicateRegistration(AckHandle::from("A1"));
        assert_eq!(
            err.to_string(),
            "Ack handle A1 already has an active long-running job"
        );
    }

    #[test]
    fn test_is_transport() {
        assert!(PubSubError::Auth("no token".into()).is_transport());
        assert!(PubSubError::Transport("reset".into()).is_transport());
        assert!(PubSubError::Api {
            status: 500,
            message: String::new()
        }
        .is_transport());
        assert!(!PubSubError::Decode("bad".into()).is_transport());
        assert!(!PubSubError::DuplicateRegistration(AckHandle::from("x")).is_transport());
    }
}
