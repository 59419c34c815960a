// locus_core/src/estimation/state.rs

use std::f64::consts::PI;
use std::time::Duration;

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::estimation::{BeliefState, UpdateOutcome};

/// Index of each component in the planar state vector.
pub const POSITION_X: usize = 0;
pub const POSITION_Y: usize = 1;
pub const ORIENTATION_Z: usize = 2;

/// Wraps an angle into (-pi, pi].
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped == -PI {
        PI
    } else {
        wrapped
    }
}

/// The reference belief state: a planar pose `(x, y, yaw)` with its
/// covariance, propagated with a random-walk model between updates.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarState {
    pub mean: Vector3<f64>,
    pub covariance: Matrix3<f64>,
    /// Diagonal process noise density, per second.
    pub process_noise: Vector3<f64>,
}

impl PlanarState {
    pub fn new(mean: Vector3<f64>, covariance: Matrix3<f64>) -> Self {
        Self {
            mean,
            covariance,
            process_noise: Vector3::zeros(),
        }
    }

    pub fn with_process_noise(mut self, process_noise: Vector3<f64>) -> Self {
        self.process_noise = process_noise;
        self
    }

    pub fn x(&self) -> f64 {
        self.mean[POSITION_X]
    }

    pub fn y(&self) -> f64 {
        self.mean[POSITION_Y]
    }

    pub fn yaw(&self) -> f64 {
        self.mean[ORIENTATION_Z]
    }

    /// Fuses a linearised measurement.
    ///
    /// * `innovation`: `z - h(x)`, already wrapped for angular components.
    /// * `h_jac`: the measurement Jacobian `H`, `m x 3`.
    /// * `r_mat`: the measurement noise covariance `R`, `m x m`.
    /// * `threshold`: the Mahalanobis distance above which the measurement is
    ///   rejected.
    ///
    /// The state is only modified when the outcome is `Accepted`.
    pub fn kalman_update(
        &mut self,
        innovation: &DVector<f64>,
        h_jac: &DMatrix<f64>,
        r_mat: &DMatrix<f64>,
        threshold: f64,
    ) -> UpdateOutcome {
        let p = DMatrix::from_column_slice(3, 3, self.covariance.as_slice());

        // Innovation covariance S = H P H^T + R
        let s = h_jac * &p * h_jac.transpose() + r_mat;
        let s_inv = match s.try_inverse() {
            Some(s_inv) => s_inv,
            // A singular S means the measurement carries no usable information.
            None => return UpdateOutcome::Skipped,
        };

        let d2 = (innovation.transpose() * &s_inv * innovation)[(0, 0)];
        let mahalanobis_distance = d2.max(0.0).sqrt();
        if !mahalanobis_distance.is_finite() || mahalanobis_distance > threshold {
            return UpdateOutcome::Rejected {
                mahalanobis_distance,
            };
        }

        let k_gain = &p * h_jac.transpose() * s_inv;
        let correction = &k_gain * innovation;
        let i = DMatrix::<f64>::identity(3, 3);
        let p_new = (i - &k_gain * h_jac) * p;

        self.mean += Vector3::new(correction[0], correction[1], correction[2]);
        self.mean[ORIENTATION_Z] = wrap_angle(self.mean[ORIENTATION_Z]);
        // Keep P symmetric against round-off.
        let p_new = Matrix3::from_column_slice(p_new.as_slice());
        self.covariance = (p_new + p_new.transpose()) * 0.5;

        UpdateOutcome::Accepted {
            mahalanobis_distance,
        }
    }
}

impl Default for PlanarState {
    fn default() -> Self {
        Self::new(Vector3::zeros(), Matrix3::identity())
    }
}

impl BeliefState for PlanarState {
    fn predict(&mut self, dt: Duration) {
        let dt = dt.as_secs_f64();
        self.covariance += Matrix3::from_diagonal(&(self.process_noise * dt));
    }

    fn position(&self) -> Option<(f64, f64)> {
        Some((self.x(), self.y()))
    }

    /// `0.5887 * (sigma_x + sigma_y)`, accurate while the two are comparable.
    fn circular_error_probable(&self) -> Option<f64> {
        let sigma_x = self.covariance[(POSITION_X, POSITION_X)].max(0.0).sqrt();
        let sigma_y = self.covariance[(POSITION_Y, POSITION_Y)].max(0.0).sqrt();
        Some(CEP_FACTOR * (sigma_x + sigma_y))
    }
}

const CEP_FACTOR: f64 = 0.5887;
