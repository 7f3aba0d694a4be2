//! Routes inbound bus messages into the sensor store

use crate::core::Channel;
use crate::processing::{MessageParser, ParseError, SensorStore};
use crate::transport::bus::{InboundMessage, Subscriber};
use crate::utils::config::Topics;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Message intake counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub applied: u64,
    pub unknown_topic: u64,
    pub malformed: u64,
    pub transport_errors: u64,
}

/// Maps topics to channels, parses payloads and writes the store
pub struct SensorDispatcher {
    routes: Vec<(String, Channel)>,
    parser: MessageParser,
    store: Arc<SensorStore>,
}

impl SensorDispatcher {
    pub fn new(topics: &Topics, parser: MessageParser, store: Arc<SensorStore>) -> Self {
        let routes = vec![
            (topics.gps.clone(), Channel::Gps),
            (topics.imu.clone(), Channel::Imu),
            (topics.uwb.clone(), Channel::Uwb),
        ];
        Self { routes, parser, store }
    }

    /// Channel subscribed to `topic`, if any
    pub fn channel_for(&self, topic: &str) -> Option<Channel> {
        self.routes
            .iter()
            .find(|(t, _)| t == topic)
            .map(|(_, channel)| *channel)
    }

    /// Parse one message and store it. A rejected message leaves the store untouched.
    pub fn handle(&self, message: &InboundMessage) -> Result<Channel, ParseError> {
        let channel = self
            .channel_for(&message.topic)
            .ok_or_else(|| ParseError::UnknownTopic(message.topic.clone()))?;

        let reading = self.parser.parse(channel, &message.payload)?;
        self.store.set(reading);
        Ok(channel)
    }

    /// Receive until the stream ends or fails for good
    pub fn run<S: Subscriber + ?Sized>(&self, subscriber: &mut S) -> DispatchStats {
        let mut stats = DispatchStats::default();

        loop {
            match subscriber.recv() {
                Ok(Some(message)) => {
                    stats.received += 1;
                    match self.handle(&message) {
                        Ok(channel) => {
                            stats.applied += 1;
                            debug!(%channel, "reading stored");
                        }
                        Err(ParseError::UnknownTopic(topic)) => {
                            stats.unknown_topic += 1;
                            debug!(%topic, "ignoring message on unknown topic");
                        }
                        Err(e) => {
                            stats.malformed += 1;
                            warn!(topic = %message.topic, error = %e, "dropping message");
                        }
                    }
                }
                Ok(None) => {
                    info!("inbound stream ended; readings will go stale");
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    stats.transport_errors += 1;
                    warn!(error = %e, "skipping inbound frame");
                }
                Err(e) => {
                    stats.transport_errors += 1;
                    error!(error = %e, "inbound transport failed; readings will go stale");
                    break;
                }
            }
        }

        stats
    }
}
