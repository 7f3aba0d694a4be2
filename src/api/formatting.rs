//! Record presentation and JSON encoding

use crate::api::types::{FilterEstimate, PositionRecord};
use crate::core::{POSITION_DECIMALS, VELOCITY_DECIMALS};
use nalgebra::Vector6;

/// Round to a fixed number of decimal digits
pub fn round_to_decimals(value: f64, decimals: u8) -> f64 {
    let multiplier = 10_f64.powi(decimals as i32);
    (value * multiplier).round() / multiplier
}

/// Filter state `[x, vx, y, vy, z, vz]` rounded for publication
pub fn present_state(state: &Vector6<f64>) -> FilterEstimate {
    let position = |v: f64| round_to_decimals(v, POSITION_DECIMALS);
    let velocity = |v: f64| round_to_decimals(v, VELOCITY_DECIMALS);

    FilterEstimate {
        px: position(state[0]),
        vx: velocity(state[1]),
        py: position(state[2]),
        vy: velocity(state[3]),
        pz: position(state[4]),
        vz: velocity(state[5]),
    }
}

/// JSON formatter for position records
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter {
    /// Pretty print JSON; records sent to line-oriented sinks must stay compact
    pub pretty: bool,
}

impl JsonFormatter {
    /// Create a new compact JSON formatter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pretty-printing JSON formatter
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    /// Format record as JSON string
    pub fn format_json(&self, record: &PositionRecord) -> Result<String, serde_json::Error> {
        if self.pretty {
            serde_json::to_string_pretty(record)
        } else {
            serde_json::to_string(record)
        }
    }

    /// Parse a record previously produced by `format_json`
    pub fn parse_json(&self, json: &str) -> Result<PositionRecord, serde_json::Error> {
        serde_json::from_str(json)
    }
}
