//! Error types for the application.

use thiserror::Error;

use crate::common::types::{ChannelRef, MessageId};

/// Configuration-related errors. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// Outbound action a transport error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendAction {
    Send,
    Edit,
    Delete,
}

impl std::fmt::Display for SendAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SendAction::Send => "send",
            SendAction::Edit => "edit",
            SendAction::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Per-event relay errors. Isolated to a single event or destination.
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    #[error("Failed to {action} message in {destination}: {reason}")]
    Transport {
        action: SendAction,
        destination: ChannelRef,
        reason: String,
    },

    #[error("No relayed copies known for message {message_id}")]
    UnknownOrigin { message_id: MessageId },
}

impl RelayError {
    pub fn transport(action: SendAction, destination: ChannelRef, reason: impl ToString) -> Self {
        RelayError::Transport {
            action,
            destination,
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for send capability operations.
pub type RelayResult<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = RelayError::transport(SendAction::Edit, ChannelRef::new(1, 2), "missing access");
        assert_eq!(err.to_string(), "Failed to edit message in 1/2: missing access");
    }
}
