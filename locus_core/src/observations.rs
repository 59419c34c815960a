// locus_core/src/observations.rs

//! In-memory observation values, one per sensor modality.
//!
//! Every observation is immutable once built: fields are private and only
//! exposed through accessors. An observation is moved into the update
//! operation that carries it and is consumed when that operation runs.

use nalgebra::{Matrix3, Vector2, Vector3};

// =========================================================================
// == Course ==
// =========================================================================

/// A heading measurement `Y` with its variance `R`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationCourse {
    y: f64,
    r: f64,
}

impl ObservationCourse {
    pub fn new(angle: f64, variance: f64) -> Self {
        Self { y: angle, r: variance }
    }

    /// The measured heading, in radians.
    pub fn y(&self) -> f64 {
        self.y
    }

    /// The heading variance, in rad².
    pub fn r(&self) -> f64 {
        self.r
    }
}

// =========================================================================
// == Pose ==
// =========================================================================

/// A planar pose measurement `(x, y, yaw)` taken at a lever arm offset from
/// the body origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationPose {
    y: Vector3<f64>,
    r: Matrix3<f64>,
    level_arm: Vector3<f64>,
}

impl ObservationPose {
    pub const POSITION_X: usize = 0;
    pub const POSITION_Y: usize = 1;
    pub const ORIENTATION_Z: usize = 2;

    pub fn new(y: Vector3<f64>, r: Matrix3<f64>, level_arm: Vector3<f64>) -> Self {
        Self { y, r, level_arm }
    }

    pub fn y(&self) -> &Vector3<f64> {
        &self.y
    }

    pub fn r(&self) -> &Matrix3<f64> {
        &self.r
    }

    pub fn level_arm(&self) -> &Vector3<f64> {
        &self.level_arm
    }
}

// =========================================================================
// == Range ==
// =========================================================================

/// A distance between an antenna on the vehicle and a fixed anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationRange {
    y: f64,
    r: f64,
    initiator_antenna_position: Vector3<f64>,
    responder_antenna_position: Vector3<f64>,
}

impl ObservationRange {
    pub fn new(
        range: f64,
        variance: f64,
        initiator_antenna_position: Vector3<f64>,
        responder_antenna_position: Vector3<f64>,
    ) -> Self {
        Self {
            y: range,
            r: variance,
            initiator_antenna_position,
            responder_antenna_position,
        }
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn r(&self) -> f64 {
        self.r
    }

    /// Antenna on the vehicle, body frame.
    pub fn initiator_antenna_position(&self) -> &Vector3<f64> {
        &self.initiator_antenna_position
    }

    /// Anchor antenna, world frame.
    pub fn responder_antenna_position(&self) -> &Vector3<f64> {
        &self.responder_antenna_position
    }
}

// =========================================================================
// == Pose2D ==
// =========================================================================

/// An estimated planar pose with covariance, e.g. the output of another
/// localisation source that is re-published as a pose observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose2D {
    pub position: Vector2<f64>,
    pub yaw: f64,
    pub covariance: Matrix3<f64>,
}

impl Default for Pose2D {
    fn default() -> Self {
        Self {
            position: Vector2::zeros(),
            yaw: 0.0,
            covariance: Matrix3::zeros(),
        }
    }
}
