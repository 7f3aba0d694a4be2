//! Multi-sensor position fusion
//!
//! Fuses satellite fixes, inertial acceleration and ultra-wideband fixes into
//! one position estimate with a constant-velocity Kalman filter, publishing a
//! geodetic position record at a fixed rate.

pub mod core;
pub mod algorithms;
pub mod processing;
pub mod transport;
pub mod utils;
pub mod api;

// Re-export commonly used types
pub use core::{Channel, GpsReading, ImuReading, LocalPosition, PositionSource, SensorReading, UwbReading};
pub use algorithms::{CoordinateTransform, Ellipsoid, GeodesicError, GeodeticCoordinate};
pub use processing::{ConstantVelocityFilter, FilterError, MessageParser, ParseError, SensorSnapshot, SensorStore};
pub use transport::{InboundMessage, Publisher, SensorDispatcher, Subscriber, TransportError};
pub use utils::{ConfigError, FusionConfig};
pub use api::{
    EngineStats, FusionEngine, FusionError, FusionHandle, FusionResult, JsonFormatter, PositionRecord, RecordSink,
};
