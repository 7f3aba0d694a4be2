use crate::core::{
    GpsReading, ImuReading, LocalPosition, UwbReading, DEFAULT_TOPIC_GPS, DEFAULT_TOPIC_IMU,
    DEFAULT_TOPIC_POSITION, DEFAULT_TOPIC_UWB,
};
use crate::utils::logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Complete service configuration, built once at startup and shared by reference
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Estimator parameters and loop period
    pub filter: FilterConfig,
    /// Local frame anchoring
    pub frame: FrameConfig,
    /// Message bus connection
    pub transport: TransportConfig,
    /// Record log
    pub output: OutputConfig,
    /// Readings the store holds before any message arrives
    pub initial_readings: InitialReadings,
    /// Diagnostic log level
    pub log_level: LogLevel,
}

/// Estimator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Discretization interval and loop period (seconds)
    pub dt: f64,
    /// Process noise variance applied to every state component
    pub process_variance: f64,
    /// Position measurement standard deviation (meters)
    pub position_std: f64,
    /// Acceleration measurement standard deviation (m/s²)
    pub acceleration_std: f64,
    /// Initial state covariance diagonal
    pub initial_variance: f64,
    /// Initial position in the local frame; velocity starts at zero
    pub initial_position: LocalPosition,
}

/// Geodetic anchor of the local frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeodeticOrigin {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Height above mean sea level (meters)
    pub height: f64,
}

/// Local frame configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub origin: GeodeticOrigin,
    /// Angle between the local frame axes and true north (degrees); only the magnitude is used
    pub angle_offset_deg: f64,
}

/// Topic names per channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
    pub gps: String,
    pub imu: String,
    pub uwb: String,
    /// Outbound position records
    pub position: String,
}

/// MQTT broker connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    /// Client identifier; also stamped as `name` on every record
    pub client_id: String,
    /// Keep-alive interval negotiated with the broker (seconds)
    pub keep_alive_secs: u64,
    /// Outgoing requests buffered before publishes are dropped
    pub queue_capacity: usize,
    /// Pause between reconnection attempts (milliseconds)
    pub reconnect_delay_ms: u64,
    pub topics: Topics,
}

/// Record log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Append-only JSON line log of emitted records
    pub log_file: PathBuf,
    /// Truncate the log when the service starts
    pub truncate: bool,
}

/// Store seed values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialReadings {
    pub gps: GpsReading,
    pub imu: ImuReading,
    pub uwb: UwbReading,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid parameter value
    #[error("invalid parameter '{parameter}' = {value}: {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },
    /// Configuration file I/O error
    #[error("failed to access config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// JSON serialization/deserialization error
    #[error("invalid config JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            dt: 0.1,
            process_variance: 1e-5,
            position_std: 0.02,
            acceleration_std: 0.01,
            initial_variance: 100.0,
            initial_position: LocalPosition::new(-4.60, -2.10, 0.50),
        }
    }
}

impl FilterConfig {
    /// Loop period; same value as the estimator's `dt`
    pub fn period(&self) -> Duration {
        Duration::try_from_secs_f64(self.dt).unwrap_or(Duration::ZERO)
    }
}

impl Default for GeodeticOrigin {
    fn default() -> Self {
        Self {
            latitude: 62.78910212,
            longitude: 22.82212920,
            height: 45521.0,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            origin: GeodeticOrigin::default(),
            angle_offset_deg: -9.0,
        }
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            gps: DEFAULT_TOPIC_GPS.to_string(),
            imu: DEFAULT_TOPIC_IMU.to_string(),
            uwb: DEFAULT_TOPIC_UWB.to_string(),
            position: DEFAULT_TOPIC_POSITION.to_string(),
        }
    }
}

impl Topics {
    /// Inbound topics in channel order
    pub fn inbound(&self) -> [&str; 3] {
        [&self.gps, &self.imu, &self.uwb]
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "fusion".to_string(),
            keep_alive_secs: 60,
            queue_capacity: 64,
            reconnect_delay_ms: 1000,
            topics: Topics::default(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("sensordata.log"),
            truncate: true,
        }
    }
}

impl FusionConfig {
    /// Load and validate configuration from a JSON file.
    ///
    /// Missing sections and keys take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path_str,
            source,
        })?;

        let config: FusionConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let content = serde_json::to_string_pretty(self)?;

        fs::write(&path, content).map_err(|source| ConfigError::Io {
            path: path_str,
            source,
        })
    }

    /// Check every parameter; the first violation is returned
    pub fn validate(&self) -> Result<(), ConfigError> {
        let filter = &self.filter;
        if !filter.dt.is_finite() || filter.dt <= 0.0 {
            return Err(invalid("filter.dt", filter.dt, "must be positive and finite"));
        }
        check_non_negative("filter.process_variance", filter.process_variance)?;
        check_non_negative("filter.position_std", filter.position_std)?;
        check_non_negative("filter.acceleration_std", filter.acceleration_std)?;
        if !filter.initial_variance.is_finite() || filter.initial_variance <= 0.0 {
            return Err(invalid(
                "filter.initial_variance",
                filter.initial_variance,
                "must be positive and finite",
            ));
        }
        let p = filter.initial_position;
        if ![p.x, p.y, p.z].iter().all(|v| v.is_finite()) {
            return Err(invalid("filter.initial_position", format!("{:?}", p), "must be finite"));
        }

        let origin = &self.frame.origin;
        if !(-90.0..=90.0).contains(&origin.latitude) {
            return Err(invalid("frame.origin.latitude", origin.latitude, "must be in [-90, 90]"));
        }
        if !(-180.0..=180.0).contains(&origin.longitude) {
            return Err(invalid("frame.origin.longitude", origin.longitude, "must be in [-180, 180]"));
        }
        if !origin.height.is_finite() {
            return Err(invalid("frame.origin.height", origin.height, "must be finite"));
        }
        if !self.frame.angle_offset_deg.is_finite() {
            return Err(invalid("frame.angle_offset_deg", self.frame.angle_offset_deg, "must be finite"));
        }

        let transport = &self.transport;
        if transport.host.trim().is_empty() {
            return Err(invalid("transport.host", "\"\"", "must not be empty"));
        }
        if transport.port == 0 {
            return Err(invalid("transport.port", 0, "must be non-zero"));
        }
        if transport.client_id.trim().is_empty() {
            return Err(invalid("transport.client_id", "\"\"", "must not be empty"));
        }
        if transport.keep_alive_secs < 5 {
            return Err(invalid("transport.keep_alive_secs", transport.keep_alive_secs, "must be at least 5"));
        }
        if transport.queue_capacity == 0 {
            return Err(invalid("transport.queue_capacity", 0, "must be non-zero"));
        }

        let topics = &transport.topics;
        let all = [&topics.gps, &topics.imu, &topics.uwb, &topics.position];
        for (i, topic) in all.iter().enumerate() {
            if topic.trim().is_empty() || topic.contains(char::is_whitespace) {
                return Err(invalid("transport.topics", format!("{:?}", topic), "must be a non-empty word"));
            }
            if all[..i].contains(topic) {
                return Err(invalid("transport.topics", topic, "topics must be distinct"));
            }
        }

        if self.output.log_file.as_os_str().is_empty() {
            return Err(invalid("output.log_file", "\"\"", "must not be empty"));
        }

        Ok(())
    }
}

fn invalid(parameter: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn check_non_negative(parameter: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(parameter, value, "must be non-negative and finite"))
    }
}
