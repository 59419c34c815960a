// locus_core/src/updaters/course.rs

use nalgebra::{DMatrix, DVector};

use crate::estimation::state::{wrap_angle, PlanarState, ORIENTATION_Z};
use crate::observations::ObservationCourse;
use crate::updaters::{Linearisation, ObservationModel};

/// Heading observed directly: `h(x) = yaw`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CourseModel;

impl ObservationModel for CourseModel {
    type Observation = ObservationCourse;

    fn label(&self) -> &'static str {
        "course"
    }

    fn linearise(
        &self,
        state: &PlanarState,
        observation: &ObservationCourse,
    ) -> Option<Linearisation> {
        let mut h_jac = DMatrix::zeros(1, 3);
        h_jac[(0, ORIENTATION_Z)] = 1.0;

        Some(Linearisation {
            innovation: DVector::from_element(1, wrap_angle(observation.y() - state.yaw())),
            h_jac,
            r_mat: DMatrix::from_element(1, 1, observation.r()),
        })
    }
}
