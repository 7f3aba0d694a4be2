use crate::utils::config::FilterConfig;
use nalgebra::{Matrix6, Vector3, Vector6};
use thiserror::Error;

/// Estimator computation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    /// Innovation covariance could not be inverted; no correction was applied
    #[error("innovation covariance is singular")]
    SingularInnovation,
}

/// Constant-velocity Kalman filter over the interleaved state `[x, vx, y, vy, z, vz]`.
///
/// The measurement model observes every state component directly (H = I),
/// so velocity slots are fed with whatever the caller places there.
#[derive(Debug, Clone)]
pub struct ConstantVelocityFilter {
    /// Current state estimate
    pub state: Vector6<f64>,
    /// State covariance matrix
    pub covariance: Matrix6<f64>,
    /// State transition for one `dt` step
    pub transition: Matrix6<f64>,
    /// Process noise covariance matrix
    pub process_noise: Matrix6<f64>,
    /// Measurement noise covariance matrix
    pub measurement_noise: Matrix6<f64>,
}

impl ConstantVelocityFilter {
    /// Create filter from configuration; velocity starts at zero
    pub fn new(config: &FilterConfig) -> Self {
        let p = config.initial_position;
        let pos_var = config.position_std * config.position_std;
        let acc_var = config.acceleration_std * config.acceleration_std;

        Self {
            state: Vector6::new(p.x, 0.0, p.y, 0.0, p.z, 0.0),
            covariance: Matrix6::identity() * config.initial_variance,
            transition: Self::create_state_transition_matrix(config.dt),
            process_noise: Matrix6::identity() * config.process_variance,
            measurement_noise: Matrix6::from_diagonal(&Vector6::new(
                pos_var, acc_var, pos_var, acc_var, pos_var, acc_var,
            )),
        }
    }

    /// Advance state one step: `x = F x`, `P = F P Fᵀ + Q`
    pub fn predict(&mut self) {
        let f = self.transition;
        self.state = f * self.state;
        self.covariance = f * self.covariance * f.transpose() + self.process_noise;
    }

    /// Correct the state with a full-state measurement `[px, ax, py, ay, pz, az]`.
    ///
    /// When the innovation covariance is singular the state and covariance
    /// are left exactly as they were and an error is returned.
    pub fn update(&mut self, measurement: &Vector6<f64>) -> Result<(), FilterError> {
        let h = Matrix6::<f64>::identity();
        let r = self.measurement_noise;

        // Innovation (measurement residual)
        let innovation = measurement - h * self.state;

        // Innovation covariance
        let s = h * self.covariance * h.transpose() + r;
        let s_inv = s.try_inverse().ok_or(FilterError::SingularInnovation)?;

        let k = self.covariance * h.transpose() * s_inv;
        self.state += k * innovation;

        // Joseph form keeps P positive semi-definite
        let i_kh = Matrix6::identity() - k * h;
        let p = i_kh * self.covariance * i_kh.transpose() + k * r * k.transpose();
        self.covariance = (p + p.transpose()) * 0.5;

        Ok(())
    }

    /// Current position estimate
    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.state[0], self.state[2], self.state[4])
    }

    /// Current velocity estimate
    pub fn velocity(&self) -> Vector3<f64> {
        Vector3::new(self.state[1], self.state[3], self.state[5])
    }

    /// Position standard deviations
    pub fn position_uncertainty(&self) -> Vector3<f64> {
        Vector3::new(
            self.covariance[(0, 0)].sqrt(),
            self.covariance[(2, 2)].sqrt(),
            self.covariance[(4, 4)].sqrt(),
        )
    }

    /// Create state transition matrix for constant velocity model
    fn create_state_transition_matrix(dt: f64) -> Matrix6<f64> {
        Matrix6::new(
            1.0, dt,  0.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 1.0, dt,  0.0, 0.0,
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 1.0, dt,
            0.0, 0.0, 0.0, 0.0, 0.0, 1.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LocalPosition;
    use approx::assert_abs_diff_eq;

    fn diagonal(filter: &ConstantVelocityFilter) -> Vector6<f64> {
        filter.covariance.diagonal()
    }

    #[test]
    fn test_filter_initialization() {
        let filter = ConstantVelocityFilter::new(&FilterConfig::default());

        assert_abs_diff_eq!(filter.position(), Vector3::new(-4.60, -2.10, 0.50), epsilon = 1e-12);
        assert_eq!(filter.velocity(), Vector3::<f64>::zeros());
        assert_eq!(filter.covariance, Matrix6::<f64>::identity() * 100.0);
        assert_abs_diff_eq!(filter.measurement_noise[(0, 0)], 0.0004, epsilon = 1e-15);
        assert_abs_diff_eq!(filter.measurement_noise[(1, 1)], 0.0001, epsilon = 1e-15);
    }

    #[test]
    fn test_filter_prediction() {
        let mut filter = ConstantVelocityFilter::new(&FilterConfig {
            dt: 0.5,
            initial_position: LocalPosition::new(0.0, 0.0, 0.0),
            ..FilterConfig::default()
        });
        filter.state = Vector6::new(0.0, 2.0, 1.0, -1.0, 0.0, 0.0);

        filter.predict();

        assert_abs_diff_eq!(filter.position(), Vector3::new(1.0, 0.5, 0.0), epsilon = 1e-12);
        assert_abs_diff_eq!(filter.velocity(), Vector3::new(2.0, -1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_predict_grows_covariance() {
        let mut filter = ConstantVelocityFilter::new(&FilterConfig::default());

        for _ in 0..20 {
            let before = diagonal(&filter);
            filter.predict();
            let after = diagonal(&filter);
            for i in 0..6 {
                assert!(after[i] >= before[i]);
            }
        }
    }

    #[test]
    fn test_update_shrinks_covariance() {
        let mut filter = ConstantVelocityFilter::new(&FilterConfig::default());
        let measurement = Vector6::new(1.0, 0.0, 2.0, 0.0, 0.0, 0.0);

        for _ in 0..20 {
            filter.predict();
            let before = diagonal(&filter);
            filter.update(&measurement).unwrap();
            let after = diagonal(&filter);
            for i in 0..6 {
                assert!(after[i] <= before[i] + 1e-12);
            }
        }
    }

    #[test]
    fn test_covariance_stays_symmetric() {
        let mut filter = ConstantVelocityFilter::new(&FilterConfig::default());
        let measurement = Vector6::new(3.0, 0.1, -1.0, 0.2, 0.5, -0.1);

        for _ in 0..50 {
            filter.predict();
            filter.update(&measurement).unwrap();
            assert_eq!(filter.covariance, filter.covariance.transpose());
        }
    }

    #[test]
    fn test_update_moves_toward_measurement() {
        let mut filter = ConstantVelocityFilter::new(&FilterConfig {
            initial_position: LocalPosition::new(0.0, 0.0, 0.0),
            ..FilterConfig::default()
        });

        filter.predict();
        filter.update(&Vector6::new(1.0, 0.0, 1.0, 0.0, 0.0, 0.0)).unwrap();

        let position = filter.position();
        assert!(position.x > 0.0 && position.x <= 1.0);
        assert!(position.y > 0.0 && position.y <= 1.0);
    }

    #[test]
    fn test_singular_innovation_keeps_state() {
        let mut filter = ConstantVelocityFilter::new(&FilterConfig {
            process_variance: 0.0,
            position_std: 0.0,
            acceleration_std: 0.0,
            ..FilterConfig::default()
        });
        filter.covariance = Matrix6::zeros();
        filter.predict();

        let state = filter.state;
        let covariance = filter.covariance;
        let result = filter.update(&Vector6::new(1.0, 0.0, 2.0, 0.0, 0.0, 0.0));

        assert_eq!(result, Err(FilterError::SingularInnovation));
        assert_eq!(filter.state, state);
        assert_eq!(filter.covariance, covariance);
    }

    #[test]
    fn test_free_running_estimate_barely_moves() {
        let mut filter = ConstantVelocityFilter::new(&FilterConfig::default());

        for _ in 0..100 {
            filter.predict();
            let p = filter.position();
            let own = Vector6::new(p.x, 0.0, p.y, 0.0, p.z, 0.0);
            filter.update(&own).unwrap();
        }

        assert_abs_diff_eq!(filter.position(), Vector3::new(-4.60, -2.10, 0.50), epsilon = 1e-6);
        assert_abs_diff_eq!(filter.velocity(), Vector3::<f64>::zeros(), epsilon = 1e-6);
    }

    #[test]
    fn test_converges_to_fixed_position() {
        let mut filter = ConstantVelocityFilter::new(&FilterConfig::default());
        let measurement = Vector6::new(1.0, 0.0, 2.0, 0.0, 0.0, 0.0);

        for _ in 0..500 {
            filter.predict();
            filter.update(&measurement).unwrap();
        }

        assert_abs_diff_eq!(filter.position(), Vector3::new(1.0, 2.0, 0.0), epsilon = 1e-2);
        assert!(filter.position_uncertainty().x < 0.05);
    }
}
