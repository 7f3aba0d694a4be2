//! Geodetic positioning algorithms

pub mod geodesic;
pub mod coordinates;

pub use geodesic::{Ellipsoid, GeodesicError};
pub use coordinates::{CoordinateTransform, GeodeticCoordinate};
