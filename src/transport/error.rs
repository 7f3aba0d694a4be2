//! Transport error types

use thiserror::Error;

/// Errors raised by message bus implementations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Broker could not be reached or refused the session
    #[error("failed to connect to {address}: {source}")]
    ConnectionFailed {
        address: String,
        #[source]
        source: rumqttc::ConnectionError,
    },
    /// Outgoing queue is full; the message was dropped instead of waiting
    #[error("outgoing queue full, dropped message on {topic}")]
    QueueFull { topic: String },
    /// Received payload is not UTF-8 text
    #[error("malformed payload on {topic}: {details}")]
    MalformedPayload { topic: String, details: String },
    /// Connection was closed locally or by the peer
    #[error("connection closed")]
    Closed,
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

impl TransportError {
    /// Whether the connection is still usable after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportError::QueueFull { .. } | TransportError::MalformedPayload { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(TransportError::QueueFull { topic: "t".into() }.is_recoverable());
        assert!(TransportError::MalformedPayload {
            topic: "t".into(),
            details: "x".into()
        }
        .is_recoverable());
        assert!(!TransportError::Closed.is_recoverable());

        let refused = rumqttc::ConnectionError::Io(std::io::ErrorKind::ConnectionRefused.into());
        assert!(!TransportError::ConnectionFailed {
            address: "localhost:1883".into(),
            source: refused
        }
        .is_recoverable());
    }
}
