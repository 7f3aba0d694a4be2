//! MQTT broker connection
//!
//! The subscriber drives the client's event loop: outgoing messages queued by
//! the publisher reach the broker only while the receiving thread is inside
//! `recv`. Publishing never waits; a full queue drops the message.

use crate::transport::bus::{InboundMessage, Publisher, Subscriber};
use crate::transport::{TransportError, TransportResult};
use crate::utils::config::TransportConfig;
use rumqttc::{
    Client, Connection, ConnectionError, Event, MqttOptions, Outgoing, Packet, Publish, QoS, SubscribeFilter,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection factory for the MQTT broker
pub struct MqttBus;

impl MqttBus {
    /// Connect to the configured broker, wait for the session to be
    /// acknowledged and subscribe to the sensor topics.
    pub fn connect(config: &TransportConfig) -> TransportResult<(MqttPublisher, MqttSubscriber)> {
        let address = format!("{}:{}", config.host, config.port);
        let (publisher, mut subscriber) = Self::open(config);

        loop {
            match subscriber.connection.iter().next() {
                Some(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    info!(broker = %address, client_id = %config.client_id, code = ?ack.code, "connected to broker");
                    break;
                }
                Some(Ok(event)) => debug!(?event, "waiting for session acknowledgement"),
                Some(Err(source)) => return Err(TransportError::ConnectionFailed { address, source }),
                None => return Err(TransportError::Closed),
            }
        }

        subscriber.subscribe()?;
        Ok((publisher, subscriber))
    }

    /// Build both client halves without touching the network
    pub fn open(config: &TransportConfig) -> (MqttPublisher, MqttSubscriber) {
        let mut options = MqttOptions::new(config.client_id.as_str(), config.host.as_str(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_session(true);

        let (client, connection) = Client::new(options, config.queue_capacity.max(1));
        let closing = Arc::new(AtomicBool::new(false));
        let topics = config.topics.inbound().iter().map(|topic| topic.to_string()).collect();

        let publisher = MqttPublisher {
            client: client.clone(),
            closing: Arc::clone(&closing),
        };
        let subscriber = MqttSubscriber {
            client,
            connection,
            topics,
            closing,
            retry_delay: Duration::from_millis(config.reconnect_delay_ms),
        };
        (publisher, subscriber)
    }
}

/// Publishing half of a broker connection
pub struct MqttPublisher {
    client: Client,
    closing: Arc<AtomicBool>,
}

impl MqttPublisher {
    /// End the session. Later publishes fail with `Closed` and the
    /// subscriber reports end of stream once the disconnect goes out.
    pub fn shutdown(&self) -> TransportResult<()> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.client.try_disconnect() {
            // The subscriber still stops at its next keep-alive tick
            debug!(error = %e, "disconnect request not queued");
        }
        Ok(())
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: &str) -> TransportResult<()> {
        if self.closing.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|_| TransportError::QueueFull {
                topic: topic.to_string(),
            })
    }
}

/// Receiving half of a broker connection
pub struct MqttSubscriber {
    client: Client,
    connection: Connection,
    topics: Vec<String>,
    closing: Arc<AtomicBool>,
    retry_delay: Duration,
}

impl MqttSubscriber {
    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Subscriptions do not survive a clean session, so this runs after every acknowledgement
    fn subscribe(&self) -> TransportResult<()> {
        let filters = self
            .topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce));

        self.client
            .try_subscribe_many(filters)
            .map_err(|_| TransportError::QueueFull {
                topic: self.topics.join(","),
            })?;
        debug!(topics = ?self.topics, "subscription requested");
        Ok(())
    }

    fn inbound(publish: Publish) -> TransportResult<InboundMessage> {
        match String::from_utf8(publish.payload.to_vec()) {
            Ok(payload) => Ok(InboundMessage::new(publish.topic, payload)),
            Err(e) => Err(TransportError::MalformedPayload {
                topic: publish.topic,
                details: e.to_string(),
            }),
        }
    }
}

impl Subscriber for MqttSubscriber {
    fn recv(&mut self) -> TransportResult<Option<InboundMessage>> {
        loop {
            let Some(event) = self.connection.iter().next() else {
                return Ok(None);
            };

            match event {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(None),
                Ok(Event::Outgoing(Outgoing::PingReq)) if self.is_closing() => return Ok(None),
                Ok(Event::Incoming(Packet::Publish(publish))) if !self.is_closing() => {
                    return Self::inbound(publish).map(Some);
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) if !self.is_closing() => {
                    info!("reconnected to broker");
                    if let Err(e) = self.subscribe() {
                        warn!(error = %e, "could not renew subscriptions");
                    }
                }
                Ok(_) => {}
                Err(ConnectionError::RequestsDone) => return Ok(None),
                Err(_) if self.is_closing() => return Ok(None),
                Err(e) => {
                    warn!(error = %e, retry_ms = self.retry_delay.as_millis() as u64, "broker connection lost");
                    thread::sleep(self.retry_delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::time::Instant;

    fn local_config(port: u16) -> TransportConfig {
        TransportConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..TransportConfig::default()
        }
    }

    /// Read from `stream` until `needle` shows up or the peer goes quiet
    fn read_until(stream: &mut TcpStream, buffer: &mut Vec<u8>, needle: &[u8]) -> bool {
        let mut chunk = [0u8; 512];
        loop {
            if buffer.windows(needle.len()).any(|w| w == needle) {
                return true;
            }
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => return false,
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            }
        }
    }

    fn publish_packet(topic: &str, payload: &str) -> Vec<u8> {
        let mut packet = vec![0x30, (2 + topic.len() + payload.len()) as u8, 0x00, topic.len() as u8];
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload.as_bytes());
        packet
    }

    #[test]
    fn test_publish_and_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

            let mut received = Vec::new();
            assert!(read_until(&mut stream, &mut received, b"MQTT"));
            stream.write_all(&[0x20, 0x02, 0x00, 0x00]).unwrap();

            assert!(read_until(&mut stream, &mut received, b"sensorfusion/uwb"));
            stream
                .write_all(&publish_packet("sensorfusion/uwb", r#"{"px":1.0,"py":2.0,"pz":0.0,"uwbFixOk":1}"#))
                .unwrap();

            read_until(&mut stream, &mut received, br#"{"ps":"UWB"}"#);
            received
        });

        let (publisher, mut subscriber) = MqttBus::connect(&local_config(port)).unwrap();
        publisher.publish("sensorfusion/position", r#"{"ps":"UWB"}"#).unwrap();

        let message = subscriber.recv().unwrap().unwrap();
        assert_eq!(message.topic, "sensorfusion/uwb");
        assert!(message.payload.contains("uwbFixOk"));

        publisher.shutdown().unwrap();
        assert!(subscriber.recv().unwrap().is_none());

        let received = broker.join().unwrap();
        let contains = |needle: &[u8]| received.windows(needle.len()).any(|w| w == needle);
        // CONNECT carries the length-prefixed client id
        assert!(contains(b"\x00\x06fusion"));
        assert!(contains(b"sensorfusion/gps"));
        assert!(contains(b"sensorfusion/position"));
        assert!(contains(br#"{"ps":"UWB"}"#));
    }

    #[test]
    fn test_stalled_connection_never_blocks_publisher() {
        // Nothing drives the event loop, as with a broker that stopped reading
        let config = TransportConfig {
            queue_capacity: 4,
            ..local_config(1883)
        };
        let (publisher, _subscriber) = MqttBus::open(&config);

        let started = Instant::now();
        let results: Vec<_> = (0..100)
            .map(|i| publisher.publish("sensorfusion/position", &format!(r#"{{"ts":{}}}"#, i)))
            .collect();

        assert!(started.elapsed() < Duration::from_secs(1));
        let queued = results.iter().filter(|r| r.is_ok()).count();
        assert!(queued <= 4);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(err, TransportError::QueueFull { topic } if topic == "sensorfusion/position"));
            assert!(err.is_recoverable());
        }
    }

    #[test]
    fn test_publish_after_shutdown() {
        let (publisher, _subscriber) = MqttBus::open(&local_config(1883));
        publisher.shutdown().unwrap();
        publisher.shutdown().unwrap();

        assert!(matches!(publisher.publish("t", "{}"), Err(TransportError::Closed)));
    }

    #[test]
    fn test_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = MqttBus::connect(&local_config(port));
        assert!(matches!(result, Err(TransportError::ConnectionFailed { .. })));
    }
}
