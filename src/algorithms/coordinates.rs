//! Conversion between the local positioning frame and WGS84 geodetic coordinates
//!
//! The local frame is a plane anchored at a surveyed origin and rotated by a
//! fixed angle relative to true north. Points are mapped through the polar
//! form (bearing + distance) of their planar offset: the bearing becomes a
//! geodesic azimuth and the distance a geodesic length from the origin.
//! Going back uses the inverse geodesic problem. The two directions are
//! self-consistent but not an exact round trip, since the plane is not the
//! ellipsoid.

use crate::algorithms::geodesic::{normalize_degrees, Ellipsoid, GeodesicError};
use crate::api::formatting::round_to_decimals;
use crate::core::{LocalPosition, GEODETIC_DECIMALS};
use crate::utils::config::{FrameConfig, GeodeticOrigin};

/// Geodetic coordinates produced from a local position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeodeticCoordinate {
    pub lat: f64,
    pub lon: f64,
}

/// Local frame <-> geodetic transformation anchored at a fixed origin
#[derive(Debug, Clone)]
pub struct CoordinateTransform {
    origin: GeodeticOrigin,
    angle_offset_deg: f64,
    ellipsoid: Ellipsoid,
}

impl CoordinateTransform {
    /// Create transform for the configured frame on WGS84
    pub fn new(frame: &FrameConfig) -> Self {
        Self {
            origin: frame.origin,
            angle_offset_deg: frame.angle_offset_deg,
            ellipsoid: Ellipsoid::wgs84(),
        }
    }

    pub fn origin(&self) -> &GeodeticOrigin {
        &self.origin
    }

    /// Geodesic azimuth (degrees from north) of a bearing measured from the local +X axis
    fn azimuth_from_bearing(&self, bearing_deg: f64) -> f64 {
        normalize_degrees(90.0 - bearing_deg - self.angle_offset_deg.abs())
    }

    /// Local bearing (degrees from the +X axis) of a geodesic azimuth
    fn bearing_from_azimuth(&self, azimuth_deg: f64) -> f64 {
        90.0 - azimuth_deg - self.angle_offset_deg.abs()
    }

    /// Convert a local planar position to latitude/longitude.
    ///
    /// Result is rounded to 9 decimal digits (~0.1 mm).
    pub fn to_geodetic(&self, px: f64, py: f64) -> Result<GeodeticCoordinate, GeodesicError> {
        let bearing = py.atan2(px).to_degrees();
        let azimuth = self.azimuth_from_bearing(bearing);
        let distance = px.hypot(py);

        let solution = self.ellipsoid.direct(self.origin.latitude, self.origin.longitude, azimuth, distance)?;

        Ok(GeodeticCoordinate {
            lat: round_to_decimals(solution.lat2, GEODETIC_DECIMALS),
            lon: round_to_decimals(solution.lon2, GEODETIC_DECIMALS),
        })
    }

    /// Convert latitude/longitude and height above mean sea level to the local frame.
    pub fn to_local(&self, lat: f64, lon: f64, height: f64) -> Result<LocalPosition, GeodesicError> {
        let solution = self.ellipsoid.inverse(self.origin.latitude, self.origin.longitude, lat, lon)?;
        let angle = self.bearing_from_azimuth(solution.azi1).to_radians();

        Ok(LocalPosition {
            x: solution.s12 * angle.cos(),
            y: solution.s12 * angle.sin(),
            z: height - self.origin.height,
        })
    }
}
