//! Publish/subscribe interfaces the service is written against

use crate::transport::TransportResult;

/// Message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Outbound side of the bus, shared with the fusion thread
pub trait Publisher: Send + Sync {
    /// Publish `payload` on `topic`; fire-and-forget, no delivery guarantee.
    /// Must not block on a slow peer.
    fn publish(&self, topic: &str, payload: &str) -> TransportResult<()>;
}

/// Inbound side of the bus, owned by the receiving thread
pub trait Subscriber: Send {
    /// Block until the next message arrives.
    /// Returns Ok(None) once the stream has ended.
    fn recv(&mut self) -> TransportResult<Option<InboundMessage>>;
}
