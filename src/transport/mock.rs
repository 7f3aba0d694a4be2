//! In-memory bus for testing and development

use crate::transport::bus::{InboundMessage, Publisher, Subscriber};
use crate::transport::{TransportError, TransportResult};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MockState {
    inbound: VecDeque<InboundMessage>,
    published: Vec<(String, String)>,
    connected: bool,
}

/// Mock bus; clones share the same state
#[derive(Debug, Clone)]
pub struct MockBus {
    state: Arc<Mutex<MockState>>,
}

impl MockBus {
    /// Create a connected mock bus
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                connected: true,
                ..MockState::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a message for the subscriber side
    pub fn push_inbound(&self, topic: &str, payload: &str) {
        self.state().inbound.push_back(InboundMessage::new(topic, payload));
    }

    /// Get all messages that were published
    pub fn published(&self) -> Vec<(String, String)> {
        self.state().published.clone()
    }

    /// Get the payloads published on one topic
    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.state()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Get the number of queued inbound messages
    pub fn queued_message_count(&self) -> usize {
        self.state().inbound.len()
    }

    /// Simulate connection loss
    pub fn disconnect(&self) {
        self.state().connected = false;
    }

    /// Restore connection
    pub fn reconnect(&self) {
        self.state().connected = true;
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for MockBus {
    fn publish(&self, topic: &str, payload: &str) -> TransportResult<()> {
        let mut state = self.state();
        if !state.connected {
            return Err(TransportError::Closed);
        }
        state.published.push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

/// Drains the queued inbound messages, then reports end of stream.
impl Subscriber for MockBus {
    fn recv(&mut self) -> TransportResult<Option<InboundMessage>> {
        let mut state = self.state();
        if !state.connected {
            return Err(TransportError::Closed);
        }
        Ok(state.inbound.pop_front())
    }
}
