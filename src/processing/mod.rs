//! Estimation, shared sensor state and payload parsing

pub mod kalman;
pub mod parser;
pub mod store;

pub use kalman::{ConstantVelocityFilter, FilterError};
pub use parser::{MessageParser, ParseError, PayloadDefaults};
pub use store::{SensorSnapshot, SensorStore};
