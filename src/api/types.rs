//! Output record and engine-level types

use crate::algorithms::GeodesicError;
use crate::core::{GpsReading, ImuReading, PositionSource, UwbReading};
use crate::processing::FilterError;
use crate::utils::config::ConfigError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for engine operations
pub type FusionResult<T> = Result<T, FusionError>;

/// Engine error types
#[derive(Debug, Error)]
pub enum FusionError {
    /// Coordinate conversion failed
    #[error("coordinate conversion failed: {0}")]
    Geodesic(#[from] GeodesicError),
    /// Estimator computation failed
    #[error("estimator update failed: {0}")]
    Filter(#[from] FilterError),
    /// Record could not be serialized
    #[error("record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    /// Configuration rejected at construction
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// Engine thread could not be started
    #[error("failed to start fusion thread: {0}")]
    Spawn(#[source] std::io::Error),
    /// Engine thread panicked
    #[error("fusion thread panicked")]
    ThreadPanicked,
}

/// Filter state as published, `[x, vx, y, vy, z, vz]` under the record's field names
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterEstimate {
    pub px: f64,
    #[serde(rename = "ax")]
    pub vx: f64,
    pub py: f64,
    #[serde(rename = "ay")]
    pub vy: f64,
    pub pz: f64,
    #[serde(rename = "az")]
    pub vz: f64,
}

/// GPS reading as echoed in a record; absent optional fields read as zero
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GpsEcho {
    pub lat: f64,
    pub lon: f64,
    #[serde(rename = "numSV")]
    pub num_sv: u32,
    #[serde(rename = "hMSL")]
    pub h_msl: f64,
    #[serde(rename = "hAcc")]
    pub h_acc: f64,
    #[serde(rename = "vAcc")]
    pub v_acc: f64,
}

impl From<&GpsReading> for GpsEcho {
    fn from(gps: &GpsReading) -> Self {
        Self {
            lat: gps.lat,
            lon: gps.lon,
            num_sv: gps.num_sv.unwrap_or(0),
            h_msl: gps.h_msl.unwrap_or(0.0),
            h_acc: gps.h_acc.unwrap_or(0.0),
            v_acc: gps.v_acc.unwrap_or(0.0),
        }
    }
}

/// UWB position as echoed in a record
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UwbEcho {
    pub px: f64,
    pub py: f64,
    pub pz: f64,
}

impl From<&UwbReading> for UwbEcho {
    fn from(uwb: &UwbReading) -> Self {
        Self {
            px: uwb.px,
            py: uwb.py,
            pz: uwb.pz,
        }
    }
}

/// Raw readings the cycle was computed from
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MeasurementEcho {
    pub gps: GpsEcho,
    pub imu: ImuReading,
    pub uwb: UwbEcho,
}

/// One fused position, emitted once per cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    /// Milliseconds since the Unix epoch
    pub ts: u64,
    /// Source fed to the estimator this cycle
    #[serde(rename = "ps")]
    pub source: PositionSource,
    /// Emitting client
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub ekf: FilterEstimate,
    pub meas: MeasurementEcho,
}

/// Fusion loop counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Cycles run to completion, record emitted or not
    pub cycles: u64,
    pub uwb_selected: u64,
    pub gps_selected: u64,
    pub ekf_selected: u64,
    /// Cycles whose correction was skipped because the innovation covariance was singular
    pub skipped_corrections: u64,
    /// Cycles that produced no record
    pub failed_cycles: u64,
    /// Individual sink write failures
    pub sink_failures: u64,
    /// Cycles that took longer than the period
    pub overruns: u64,
}

impl EngineStats {
    pub fn record_source(&mut self, source: PositionSource) {
        match source {
            PositionSource::Uwb => self.uwb_selected += 1,
            PositionSource::Gps => self.gps_selected += 1,
            PositionSource::Ekf => self.ekf_selected += 1,
            PositionSource::NotAvailable => {}
        }
    }
}
