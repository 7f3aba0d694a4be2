//! Core data types for the fusion system

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Measurement channel fed by the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Gps,
    Imu,
    Uwb,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Gps => "gps",
            Channel::Imu => "imu",
            Channel::Uwb => "uwb",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source whose position was fed to the filter in a given cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSource {
    /// Ultra-wideband fix
    #[serde(rename = "UWB")]
    Uwb,
    /// Satellite fix converted into the local frame
    #[serde(rename = "GPS")]
    Gps,
    /// No absolute fix; the filter free-runs on its own estimate
    #[serde(rename = "EKF")]
    Ekf,
    /// Not available
    #[serde(rename = "NA")]
    NotAvailable,
}

impl PositionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSource::Uwb => "UWB",
            PositionSource::Gps => "GPS",
            PositionSource::Ekf => "EKF",
            PositionSource::NotAvailable => "NA",
        }
    }
}

impl fmt::Display for PositionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point in the local Cartesian positioning frame (meters)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LocalPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl LocalPosition {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn to_vector3(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}

impl From<Vector3<f64>> for LocalPosition {
    fn from(v: Vector3<f64>) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// Latest satellite-navigation fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsReading {
    /// Latitude in decimal degrees
    pub lat: f64,
    /// Longitude in decimal degrees
    pub lon: f64,
    #[serde(rename = "gnssFixOk", with = "fix_flag")]
    pub fix_ok: bool,
    /// Number of satellites used in the solution
    #[serde(
        rename = "numSV",
        default,
        deserialize_with = "satellite_count::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub num_sv: Option<u32>,
    /// Height above mean sea level
    #[serde(rename = "hMSL", default, skip_serializing_if = "Option::is_none")]
    pub h_msl: Option<f64>,
    /// Horizontal accuracy estimate
    #[serde(rename = "hAcc", default, skip_serializing_if = "Option::is_none")]
    pub h_acc: Option<f64>,
    /// Vertical accuracy estimate
    #[serde(rename = "vAcc", default, skip_serializing_if = "Option::is_none")]
    pub v_acc: Option<f64>,
}

impl GpsReading {
    /// Reading without a valid fix at the given coordinates
    pub fn no_fix(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            fix_ok: false,
            num_sv: None,
            h_msl: None,
            h_acc: None,
            v_acc: None,
        }
    }

    /// Reading with a valid fix
    pub fn fixed(lat: f64, lon: f64, h_msl: f64) -> Self {
        Self {
            fix_ok: true,
            h_msl: Some(h_msl),
            ..Self::no_fix(lat, lon)
        }
    }

    /// Height above mean sea level, or `default` when the receiver did not report one
    pub fn height_or(&self, default: f64) -> f64 {
        self.h_msl.unwrap_or(default)
    }
}

impl Default for GpsReading {
    fn default() -> Self {
        Self::no_fix(0.0, 0.0)
    }
}

/// Latest inertial acceleration sample (m/s²)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ImuReading {
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
}

impl ImuReading {
    pub fn new(ax: f64, ay: f64, az: f64) -> Self {
        Self { ax, ay, az }
    }
}

/// Latest ultra-wideband position fix in the local frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UwbReading {
    pub px: f64,
    pub py: f64,
    pub pz: f64,
    #[serde(rename = "uwbFixOk", with = "fix_flag")]
    pub fix_ok: bool,
}

impl UwbReading {
    pub fn new(px: f64, py: f64, pz: f64, fix_ok: bool) -> Self {
        Self { px, py, pz, fix_ok }
    }
}

/// A reading tagged with the channel it belongs to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorReading {
    Gps(GpsReading),
    Imu(ImuReading),
    Uwb(UwbReading),
}

impl SensorReading {
    pub fn channel(&self) -> Channel {
        match self {
            SensorReading::Gps(_) => Channel::Gps,
            SensorReading::Imu(_) => Channel::Imu,
            SensorReading::Uwb(_) => Channel::Uwb,
        }
    }
}

/// Fix flags travel as `0|1` on the wire; `true`/`false` is accepted as well.
/// Only an exact `1` counts as a fix.
pub(crate) mod fix_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FlagValue {
        Number(f64),
        Bool(bool),
    }

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(match FlagValue::deserialize(deserializer)? {
            FlagValue::Number(n) => n == 1.0,
            FlagValue::Bool(b) => b,
        })
    }
}

/// Satellite counts are whole numbers, but some receivers send them as
/// floats (`7.0`). Negative or non-finite counts read as absent.
pub(crate) mod satellite_count {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n.round().min(f64::from(u32::MAX)) as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_flag_wire_format() {
        let uwb: UwbReading =
            serde_json::from_str(r#"{"px":1.0,"py":2.0,"pz":0.0,"uwbFixOk":1}"#).unwrap();
        assert!(uwb.fix_ok);

        let uwb: UwbReading =
            serde_json::from_str(r#"{"px":1.0,"py":2.0,"pz":0.0,"uwbFixOk":2}"#).unwrap();
        assert!(!uwb.fix_ok);

        let json = serde_json::to_string(&UwbReading::new(1.0, 2.0, 0.0, true)).unwrap();
        assert!(json.contains(r#""uwbFixOk":1"#));
    }

    #[test]
    fn test_gps_optional_fields() {
        let gps: GpsReading =
            serde_json::from_str(r#"{"lat":62.5,"lon":22.5,"gnssFixOk":true}"#).unwrap();
        assert!(gps.fix_ok);
        assert_eq!(gps.num_sv, None);
        assert_eq!(gps.height_or(45521.0), 45521.0);

        let gps = GpsReading::fixed(62.5, 22.5, 100.0);
        assert_eq!(gps.height_or(45521.0), 100.0);
    }

    #[test]
    fn test_satellite_count_encodings() {
        let count = |json: &str| serde_json::from_str::<GpsReading>(json).unwrap().num_sv;

        assert_eq!(count(r#"{"lat":62.5,"lon":22.5,"gnssFixOk":1,"numSV":9}"#), Some(9));
        assert_eq!(count(r#"{"lat":62.5,"lon":22.5,"gnssFixOk":1,"numSV":7.0}"#), Some(7));
        assert_eq!(count(r#"{"lat":62.5,"lon":22.5,"gnssFixOk":1,"numSV":null}"#), None);
        assert_eq!(count(r#"{"lat":62.5,"lon":22.5,"gnssFixOk":1,"numSV":-3}"#), None);

        let json = serde_json::to_string(&GpsReading { num_sv: Some(7), ..GpsReading::no_fix(1.0, 2.0) }).unwrap();
        assert!(json.contains(r#""numSV":7"#));
    }

    #[test]
    fn test_source_tags() {
        assert_eq!(serde_json::to_string(&PositionSource::Uwb).unwrap(), r#""UWB""#);
        assert_eq!(serde_json::to_string(&PositionSource::NotAvailable).unwrap(), r#""NA""#);
        let source: PositionSource = serde_json::from_str(r#""EKF""#).unwrap();
        assert_eq!(source, PositionSource::Ekf);
        assert_eq!(PositionSource::Gps.to_string(), "GPS");
    }

    #[test]
    fn test_reading_channel() {
        assert_eq!(SensorReading::Imu(ImuReading::default()).channel(), Channel::Imu);
        assert_eq!(Channel::Uwb.to_string(), "uwb");
    }
}
