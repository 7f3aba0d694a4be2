//! Utility modules for configuration and logging

pub mod config;
pub mod logging;

pub use config::{
    ConfigError, FilterConfig, FrameConfig, FusionConfig, GeodeticOrigin, InitialReadings, OutputConfig,
    Topics, TransportConfig,
};
pub use logging::{init_logging, LogLevel};
