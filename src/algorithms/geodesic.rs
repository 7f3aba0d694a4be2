//! Geodesic problems on an ellipsoidal Earth model
//!
//! Direct and inverse solutions use Vincenty's iterative formulae, which are
//! accurate to well below a millimeter on WGS84 for any pair of points that
//! are not nearly antipodal. Nearly antipodal inverse problems fail to
//! converge and are reported as errors instead of returning a guess.

use crate::core::{WGS84_FLATTENING, WGS84_SEMI_MAJOR_AXIS};
use std::f64::consts::PI;
use thiserror::Error;

/// Iteration cap for both problems
const MAX_ITERATIONS: u32 = 200;

/// Convergence threshold on sigma/lambda (radians, ~0.006 mm)
const CONVERGENCE_THRESHOLD: f64 = 1e-12;

/// Errors raised by the geodesic solvers
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeodesicError {
    #[error("invalid {field}: {value}")]
    InvalidCoordinate { field: &'static str, value: f64 },
    #[error("geodesic solution did not converge after {iterations} iterations")]
    NoConvergence { iterations: u32 },
    #[error("points are nearly antipodal; inverse problem has no stable solution")]
    Antipodal,
}

/// Solution of the direct problem
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectSolution {
    /// Destination latitude (degrees)
    pub lat2: f64,
    /// Destination longitude (degrees, normalized to (-180, 180])
    pub lon2: f64,
    /// Forward azimuth at the destination (degrees)
    pub azi2: f64,
}

/// Solution of the inverse problem
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InverseSolution {
    /// Geodesic distance (meters)
    pub s12: f64,
    /// Forward azimuth at the first point (degrees)
    pub azi1: f64,
    /// Forward azimuth at the second point (degrees)
    pub azi2: f64,
}

/// Reference ellipsoid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// Semi-major axis (meters)
    pub a: f64,
    /// Flattening
    pub f: f64,
}

impl Default for Ellipsoid {
    fn default() -> Self {
        Self::wgs84()
    }
}

impl Ellipsoid {
    pub fn new(a: f64, f: f64) -> Self {
        Self { a, f }
    }

    /// WGS84 ellipsoid parameters
    pub fn wgs84() -> Self {
        Self::new(WGS84_SEMI_MAJOR_AXIS, WGS84_FLATTENING)
    }

    /// Semi-minor axis (meters)
    pub fn b(&self) -> f64 {
        self.a * (1.0 - self.f)
    }

    /// Solve the direct problem: walk `s12` meters from (`lat1`, `lon1`) along
    /// the initial azimuth `azi1` (degrees clockwise from north).
    pub fn direct(&self, lat1: f64, lon1: f64, azi1: f64, s12: f64) -> Result<DirectSolution, GeodesicError> {
        check_latitude(lat1)?;
        check_finite("longitude", lon1)?;
        check_finite("azimuth", azi1)?;
        check_finite("distance", s12)?;

        let (a, b, f) = (self.a, self.b(), self.f);

        let alpha1 = azi1.to_radians();
        let (sin_alpha1, cos_alpha1) = alpha1.sin_cos();

        let (sin_u1, cos_u1) = reduced_latitude(lat1, f);
        let sigma1 = sin_u1.atan2(cos_u1 * cos_alpha1);
        let sin_alpha = cos_u1 * sin_alpha1;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        let u_sq = cos_sq_alpha * (a * a - b * b) / (b * b);
        let big_a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
        let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));

        let mut sigma = s12 / (b * big_a);
        let mut iterations = 0;
        let (mut sin_sigma, mut cos_sigma, mut cos_2sigma_m);
        loop {
            cos_2sigma_m = (2.0 * sigma1 + sigma).cos();
            sin_sigma = sigma.sin();
            cos_sigma = sigma.cos();
            let delta_sigma = big_b * sin_sigma * (cos_2sigma_m + big_b / 4.0
                * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                    - big_b / 6.0 * cos_2sigma_m * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                        * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));
            let sigma_prev = sigma;
            sigma = s12 / (b * big_a) + delta_sigma;
            iterations += 1;

            if (sigma - sigma_prev).abs() <= CONVERGENCE_THRESHOLD {
                break;
            }
            if iterations >= MAX_ITERATIONS {
                return Err(GeodesicError::NoConvergence { iterations });
            }
        }

        let x = sin_u1 * sin_sigma - cos_u1 * cos_sigma * cos_alpha1;
        let phi2 = (sin_u1 * cos_sigma + cos_u1 * sin_sigma * cos_alpha1)
            .atan2((1.0 - f) * (sin_alpha * sin_alpha + x * x).sqrt());
        let lambda = (sin_sigma * sin_alpha1).atan2(cos_u1 * cos_sigma - sin_u1 * sin_sigma * cos_alpha1);
        let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
        let l = lambda - (1.0 - c) * f * sin_alpha
            * (sigma + c * sin_sigma * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));

        let alpha2 = sin_alpha.atan2(-x);

        Ok(DirectSolution {
            lat2: phi2.to_degrees(),
            lon2: normalize_degrees(lon1 + l.to_degrees()),
            azi2: normalize_degrees(alpha2.to_degrees()),
        })
    }

    /// Solve the inverse problem between (`lat1`, `lon1`) and (`lat2`, `lon2`).
    pub fn inverse(&self, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Result<InverseSolution, GeodesicError> {
        check_latitude(lat1)?;
        check_latitude(lat2)?;
        check_finite("longitude", lon1)?;
        check_finite("longitude", lon2)?;

        let (a, b, f) = (self.a, self.b(), self.f);

        let l = normalize_degrees(lon2 - lon1).to_radians();
        let (sin_u1, cos_u1) = reduced_latitude(lat1, f);
        let (sin_u2, cos_u2) = reduced_latitude(lat2, f);

        let antipodal = l.abs() > PI / 2.0 || (lat2 - lat1).abs() > 90.0;

        let mut lambda = l;
        let mut iterations = 0;
        let (mut sin_lambda, mut cos_lambda);
        let (mut sin_sigma, mut cos_sigma, mut sigma);
        let (mut cos_sq_alpha, mut cos_2sigma_m);
        loop {
            sin_lambda = lambda.sin();
            cos_lambda = lambda.cos();
            let sin_sq_sigma = (cos_u2 * sin_lambda).powi(2)
                + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2);

            // Coincident points
            if sin_sq_sigma.abs() < 1e-24 {
                return Ok(InverseSolution { s12: 0.0, azi1: 0.0, azi2: 0.0 });
            }

            sin_sigma = sin_sq_sigma.sqrt();
            cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
            sigma = sin_sigma.atan2(cos_sigma);
            let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
            cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
            // Equatorial line: cos²α = 0
            cos_2sigma_m = if cos_sq_alpha != 0.0 {
                cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
            } else {
                0.0
            };
            let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
            let lambda_prev = lambda;
            lambda = l + (1.0 - c) * f * sin_alpha
                * (sigma + c * sin_sigma * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));
            iterations += 1;

            let iteration_check = if antipodal { lambda.abs() - PI } else { lambda.abs() };
            if iteration_check > PI {
                return Err(GeodesicError::Antipodal);
            }
            if (lambda - lambda_prev).abs() <= CONVERGENCE_THRESHOLD {
                break;
            }
            if iterations >= MAX_ITERATIONS {
                return Err(GeodesicError::NoConvergence { iterations });
            }
        }

        let u_sq = cos_sq_alpha * (a * a - b * b) / (b * b);
        let big_a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
        let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
        let delta_sigma = big_b * sin_sigma * (cos_2sigma_m + big_b / 4.0
            * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                - big_b / 6.0 * cos_2sigma_m * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                    * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));

        let s12 = b * big_a * (sigma - delta_sigma);
        let alpha1 = (cos_u2 * sin_lambda).atan2(cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda);
        let alpha2 = (cos_u1 * sin_lambda).atan2(-sin_u1 * cos_u2 + cos_u1 * sin_u2 * cos_lambda);

        Ok(InverseSolution {
            s12,
            azi1: normalize_degrees(alpha1.to_degrees()),
            azi2: normalize_degrees(alpha2.to_degrees()),
        })
    }
}

/// Normalize an angle in degrees into (-180, 180]
pub fn normalize_degrees(angle: f64) -> f64 {
    let mut wrapped = angle % 360.0;
    if wrapped <= -180.0 {
        wrapped += 360.0;
    } else if wrapped > 180.0 {
        wrapped -= 360.0;
    }
    wrapped
}

/// Sine and cosine of the reduced (parametric) latitude
fn reduced_latitude(lat: f64, f: f64) -> (f64, f64) {
    let tan_u = (1.0 - f) * lat.to_radians().tan();
    let cos_u = 1.0 / (1.0 + tan_u * tan_u).sqrt();
    (tan_u * cos_u, cos_u)
}

fn check_latitude(lat: f64) -> Result<(), GeodesicError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(GeodesicError::InvalidCoordinate { field: "latitude", value: lat });
    }
    Ok(())
}

fn check_finite(field: &'static str, value: f64) -> Result<(), GeodesicError> {
    if !value.is_finite() {
        return Err(GeodesicError::InvalidCoordinate { field, value });
    }
    Ok(())
}
