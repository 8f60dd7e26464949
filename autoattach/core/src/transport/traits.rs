//! Transport Traits
//!
//! Error type shared by every layer of the control connection, and the
//! [`CommandChannel`] seam the attach logic talks through.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur on the control connection
#[derive(Debug, Error)]
pub enum ControlError {
    /// Could not establish the connection to the control socket
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer closed the connection, or the router stopped
    #[error("Connection lost")]
    ConnectionLost,

    /// Bytes on the wire can never form a valid JSON message
    #[error("Framing error: {0}")]
    Framing(String),

    /// A command could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No reply arrived for a command within the configured timeout
    #[error("No reply to `{method}` (id {id}) within {timeout:?}")]
    ReplyTimeout {
        /// Method of the command that timed out
        method: String,
        /// Id of the command that timed out
        id: u64,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// The service refused the `event-receive` subscription
    #[error("Event subscription rejected by service")]
    SubscriptionRejected,

    /// IO error from the underlying socket
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControlError {
    /// Whether this error means the connection can no longer be used
    ///
    /// Reply timeouts are local to one command; everything else either
    /// desynchronized the stream or lost it entirely.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ReplyTimeout { .. })
    }
}

/// Something that can issue a command and report whether it succeeded
///
/// Implemented by [`ControlClient`](crate::client::ControlClient); the attach
/// manager only depends on this trait so it can be driven without a socket.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Send `method` with optional `params`, returning `true` iff the reply
    /// carried `code == 0`
    async fn send_command(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<bool, ControlError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_timeout_is_not_fatal() {
        let err = ControlError::ReplyTimeout {
            method: "attach".to_string(),
            id: 3,
            timeout: Duration::from_secs(1),
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("attach"));
    }

    #[test]
    fn test_connection_errors_are_fatal() {
        assert!(ControlError::ConnectionLost.is_fatal());
        assert!(ControlError::Framing("garbage".to_string()).is_fatal());
        assert!(ControlError::SubscriptionRejected.is_fatal());
    }
}
