//! Message bus abstraction and implementations
//!
//! The service core only sees the `Publisher` and `Subscriber` traits; the
//! MQTT client is the production implementation and `MockBus` backs tests.

pub mod bus;
pub mod dispatch;
pub mod error;
pub mod mock;
pub mod mqtt;

pub use bus::{InboundMessage, Publisher, Subscriber};
pub use dispatch::{DispatchStats, SensorDispatcher};
pub use error::{TransportError, TransportResult};
pub use mock::MockBus;
pub use mqtt::{MqttBus, MqttPublisher, MqttSubscriber};
