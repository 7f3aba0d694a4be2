//! Fusion engine and its output boundary

pub mod formatting;
pub mod fusion;
pub mod sink;
pub mod types;

pub use formatting::{present_state, round_to_decimals, JsonFormatter};
pub use fusion::{current_time_ms, Arbitration, FusionEngine, FusionHandle};
pub use sink::{JsonLineLog, RecordSink, SinkError, TopicPublisher};
pub use types::{
    EngineStats, FilterEstimate, FusionError, FusionResult, GpsEcho, MeasurementEcho, PositionRecord, UwbEcho,
};
