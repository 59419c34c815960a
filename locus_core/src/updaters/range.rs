// locus_core/src/updaters/range.rs

use nalgebra::{DMatrix, DVector, Vector3};

use crate::estimation::state::{PlanarState, ORIENTATION_Z, POSITION_X, POSITION_Y};
use crate::observations::ObservationRange;
use crate::updaters::{Linearisation, ObservationModel};

/// Below this predicted range the direction to the anchor is undefined.
const MIN_PREDICTED_RANGE: f64 = 1e-6;

/// Distance between the initiator antenna (body frame, carried by the
/// vehicle) and the responder antenna (world frame, fixed).
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeModel;

impl ObservationModel for RangeModel {
    type Observation = ObservationRange;

    fn label(&self) -> &'static str {
        "range"
    }

    fn linearise(
        &self,
        state: &PlanarState,
        observation: &ObservationRange,
    ) -> Option<Linearisation> {
        let (sin, cos) = state.yaw().sin_cos();
        let initiator = observation.initiator_antenna_position();
        let responder = observation.responder_antenna_position();

        // Initiator antenna in the world frame.
        let antenna = Vector3::new(
            state.x() + cos * initiator.x - sin * initiator.y,
            state.y() + sin * initiator.x + cos * initiator.y,
            initiator.z,
        );
        let delta = antenna - responder;
        let predicted_range = delta.norm();
        if predicted_range < MIN_PREDICTED_RANGE {
            return None;
        }

        let d_antenna_x_d_yaw = -sin * initiator.x - cos * initiator.y;
        let d_antenna_y_d_yaw = cos * initiator.x - sin * initiator.y;

        let mut h_jac = DMatrix::zeros(1, 3);
        h_jac[(0, POSITION_X)] = delta.x / predicted_range;
        h_jac[(0, POSITION_Y)] = delta.y / predicted_range;
        h_jac[(0, ORIENTATION_Z)] =
            (delta.x * d_antenna_x_d_yaw + delta.y * d_antenna_y_d_yaw) / predicted_range;

        Some(Linearisation {
            innovation: DVector::from_element(1, observation.y() - predicted_range),
            h_jac,
            r_mat: DMatrix::from_element(1, 1, observation.r()),
        })
    }
}
