// locus_core/src/messages.rs

//! Wire-level message definitions.
//!
//! These mirror the stamped observation messages exchanged between sensor
//! drivers and the localisation node. They are plain data: all mapping to and
//! from the in-memory observations lives in `conversions`.

use std::time::Duration;

// =========================================================================
// == Common Header ==
// =========================================================================

/// A wire timestamp, split into whole seconds and nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time {
    pub sec: i64,
    pub nanosec: u32,
}

impl Time {
    /// Saturates at `i64::MAX` seconds.
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            sec: i64::try_from(duration.as_secs()).unwrap_or(i64::MAX),
            nanosec: duration.subsec_nanos(),
        }
    }

    /// Negative seconds are outside the wire contract and map to zero.
    pub fn to_duration(self) -> Duration {
        Duration::new(self.sec.max(0) as u64, self.nanosec)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Header {
    pub stamp: Time,
    pub frame_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

// =========================================================================
// == Course ==
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ObservationCourseMsg {
    /// Heading, in radians.
    pub angle: f64,
    /// Standard deviation of the heading, in radians.
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservationCourseStamped {
    pub header: Header,
    pub observation_course: ObservationCourseMsg,
}

// =========================================================================
// == Pose 2D ==
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose2DMsg {
    pub position: Point2D,
    pub yaw: f64,
    /// Row-major 3x3 covariance over (x, y, yaw).
    pub covariance: [f64; 9],
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ObservationPose2DMsg {
    pub pose: Pose2DMsg,
    /// Position of the measuring antenna in the body frame.
    pub level_arm: Point3D,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservationPose2DStamped {
    pub header: Header,
    pub observation_pose: ObservationPose2DMsg,
}

// =========================================================================
// == Range ==
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ObservationRangeMsg {
    pub range: f64,
    pub std: f64,
    /// Antenna mounted on the vehicle, body frame.
    pub initiator_antenna_position: Point3D,
    /// Fixed anchor antenna, world frame.
    pub responder_antenna_position: Point3D,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservationRangeStamped {
    pub header: Header,
    pub observation_range: ObservationRangeMsg,
}
