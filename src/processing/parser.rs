use crate::core::types::{fix_flag, satellite_count};
use crate::core::{Channel, GpsReading, ImuReading, LocalPosition, SensorReading, UwbReading};
use crate::utils::config::FusionConfig;
use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur during message parsing
#[derive(Debug, Error)]
pub enum ParseError {
    /// Payload is not valid JSON for its channel
    #[error("malformed {channel} payload: {source}")]
    Malformed {
        channel: Channel,
        #[source]
        source: serde_json::Error,
    },
    /// Topic is not mapped to any channel
    #[error("no channel is subscribed to topic '{0}'")]
    UnknownTopic(String),
}

/// Values substituted for fields a sender leaves out
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PayloadDefaults {
    /// GPS latitude/longitude when missing
    pub gps_lat: f64,
    pub gps_lon: f64,
    /// UWB position when missing
    pub uwb_position: LocalPosition,
}

impl PayloadDefaults {
    /// GPS falls back to the frame origin, UWB to the filter's initial position
    pub fn from_config(config: &FusionConfig) -> Self {
        Self {
            gps_lat: config.frame.origin.latitude,
            gps_lon: config.frame.origin.longitude,
            uwb_position: config.filter.initial_position,
        }
    }
}

impl Default for PayloadDefaults {
    fn default() -> Self {
        Self::from_config(&FusionConfig::default())
    }
}

#[derive(Debug, Deserialize)]
struct GpsPayload {
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(rename = "gnssFixOk", default, deserialize_with = "fix_flag::deserialize")]
    fix_ok: bool,
    #[serde(rename = "numSV", default, deserialize_with = "satellite_count::deserialize")]
    num_sv: Option<u32>,
    #[serde(rename = "hMSL")]
    h_msl: Option<f64>,
    #[serde(rename = "hAcc")]
    h_acc: Option<f64>,
    #[serde(rename = "vAcc")]
    v_acc: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ImuPayload {
    ax: Option<f64>,
    ay: Option<f64>,
    az: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct UwbPayload {
    px: Option<f64>,
    py: Option<f64>,
    pz: Option<f64>,
    #[serde(rename = "uwbFixOk", default, deserialize_with = "fix_flag::deserialize")]
    fix_ok: bool,
}

/// Converts inbound JSON payloads into channel readings.
///
/// Unknown fields are ignored; missing fields take their defaults here so
/// nothing downstream deals with partial readings.
#[derive(Debug, Clone, Default)]
pub struct MessageParser {
    defaults: PayloadDefaults,
}

impl MessageParser {
    pub fn new(defaults: PayloadDefaults) -> Self {
        Self { defaults }
    }

    /// Parse a payload received for `channel`
    pub fn parse(&self, channel: Channel, payload: &str) -> Result<SensorReading, ParseError> {
        let malformed = |source| ParseError::Malformed { channel, source };

        Ok(match channel {
            Channel::Gps => SensorReading::Gps(self.parse_gps(payload).map_err(malformed)?),
            Channel::Imu => SensorReading::Imu(self.parse_imu(payload).map_err(malformed)?),
            Channel::Uwb => SensorReading::Uwb(self.parse_uwb(payload).map_err(malformed)?),
        })
    }

    fn parse_gps(&self, payload: &str) -> Result<GpsReading, serde_json::Error> {
        let msg: GpsPayload = serde_json::from_str(payload)?;
        Ok(GpsReading {
            lat: msg.lat.unwrap_or(self.defaults.gps_lat),
            lon: msg.lon.unwrap_or(self.defaults.gps_lon),
            fix_ok: msg.fix_ok,
            num_sv: msg.num_sv,
            h_msl: msg.h_msl,
            h_acc: msg.h_acc,
            v_acc: msg.v_acc,
        })
    }

    fn parse_imu(&self, payload: &str) -> Result<ImuReading, serde_json::Error> {
        let msg: ImuPayload = serde_json::from_str(payload)?;
        Ok(ImuReading::new(
            msg.ax.unwrap_or(0.0),
            msg.ay.unwrap_or(0.0),
            msg.az.unwrap_or(0.0),
        ))
    }

    fn parse_uwb(&self, payload: &str) -> Result<UwbReading, serde_json::Error> {
        let msg: UwbPayload = serde_json::from_str(payload)?;
        let fallback = self.defaults.uwb_position;
        Ok(UwbReading::new(
            msg.px.unwrap_or(fallback.x),
            msg.py.unwrap_or(fallback.y),
            msg.pz.unwrap_or(fallback.z),
            msg.fix_ok,
        ))
    }
}
