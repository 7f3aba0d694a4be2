//! Physical constants and system parameters

/// WGS84 semi-major axis (meters)
pub const WGS84_SEMI_MAJOR_AXIS: f64 = 6378137.0;

/// WGS84 flattening
pub const WGS84_FLATTENING: f64 = 1.0 / 298.257223563;

/// Decimal digits kept in published latitude/longitude
pub const GEODETIC_DECIMALS: u8 = 9;

/// Decimal digits kept for filter positions in published records
pub const POSITION_DECIMALS: u8 = 2;

/// Decimal digits kept for filter velocities in published records
pub const VELOCITY_DECIMALS: u8 = 3;

pub const DEFAULT_TOPIC_GPS: &str = "sensorfusion/gps";
pub const DEFAULT_TOPIC_IMU: &str = "sensorfusion/imu";
pub const DEFAULT_TOPIC_UWB: &str = "sensorfusion/uwb";
pub const DEFAULT_TOPIC_POSITION: &str = "sensorfusion/position";
