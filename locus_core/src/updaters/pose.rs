// locus_core/src/updaters/pose.rs

use nalgebra::{DMatrix, DVector};

use crate::estimation::state::{wrap_angle, PlanarState, ORIENTATION_Z, POSITION_X, POSITION_Y};
use crate::observations::ObservationPose;
use crate::updaters::{Linearisation, ObservationModel};

/// Full planar pose observed at a lever arm:
///
/// ```text
/// h(x) = [ x + cos(yaw) * lx - sin(yaw) * ly ]
///        [ y + sin(yaw) * lx + cos(yaw) * ly ]
///        [ yaw                               ]
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PoseModel;

impl ObservationModel for PoseModel {
    type Observation = ObservationPose;

    fn label(&self) -> &'static str {
        "pose"
    }

    fn linearise(
        &self,
        state: &PlanarState,
        observation: &ObservationPose,
    ) -> Option<Linearisation> {
        let (sin, cos) = state.yaw().sin_cos();
        let lx = observation.level_arm().x;
        let ly = observation.level_arm().y;

        let predicted_x = state.x() + cos * lx - sin * ly;
        let predicted_y = state.y() + sin * lx + cos * ly;

        let z = observation.y();
        let innovation = DVector::from_vec(vec![
            z[ObservationPose::POSITION_X] - predicted_x,
            z[ObservationPose::POSITION_Y] - predicted_y,
            wrap_angle(z[ObservationPose::ORIENTATION_Z] - state.yaw()),
        ]);

        let mut h_jac = DMatrix::<f64>::identity(3, 3);
        h_jac[(POSITION_X, ORIENTATION_Z)] = -sin * lx - cos * ly;
        h_jac[(POSITION_Y, ORIENTATION_Z)] = cos * lx - sin * ly;

        Some(Linearisation {
            innovation,
            h_jac,
            r_mat: DMatrix::from_column_slice(3, 3, observation.r().as_slice()),
        })
    }
}
