// locus_core/src/conversions.rs

//! The observation converter: pure mappings between wire messages and
//! in-memory observations.
//!
//! Conversions assume a well-formed message. They do not validate semantic
//! bounds (a negative variance passes through untouched). Standard deviations
//! on the wire map to variances in memory: `std = sqrt(r)` going out,
//! `r = std * std` coming in.

use std::time::Duration;

use nalgebra::{Matrix3, Vector3};

use crate::messages::{
    Header, ObservationCourseMsg, ObservationCourseStamped, ObservationPose2DMsg,
    ObservationPose2DStamped, ObservationRangeMsg, ObservationRangeStamped, Point2D, Point3D,
    Pose2DMsg, Time,
};
use crate::observations::{ObservationCourse, ObservationPose, ObservationRange, Pose2D};

// =========================================================================
// == Converter Contracts ==
// =========================================================================

/// A stamped wire message that carries exactly one observation type.
///
/// This is the static link between a message type and the observation an
/// `Updater` expects: a bridge only compiles when the two agree.
pub trait ObservationMessage: Send + Sync + 'static {
    type Observation: Send;

    /// The acquisition time of the observation.
    fn stamp(&self) -> Duration;

    /// Builds the in-memory observation carried by this message.
    fn extract_obs(&self) -> Self::Observation;
}

/// The outgoing direction: observation + stamp + frame into a wire message.
pub trait ToWire {
    type Message;

    fn to_wire(&self, stamp: Duration, frame_id: &str) -> Self::Message;
}

/// Splits a message into its observation and timestamp.
pub fn from_wire<M: ObservationMessage>(msg: &M) -> (M::Observation, Duration) {
    (msg.extract_obs(), msg.stamp())
}

pub fn make_header(stamp: Duration, frame_id: &str) -> Header {
    Header {
        stamp: Time::from_duration(stamp),
        frame_id: frame_id.to_string(),
    }
}

pub fn extract_duration(header: &Header) -> Duration {
    header.stamp.to_duration()
}

fn to_point3d(v: &Vector3<f64>) -> Point3D {
    Point3D {
        x: v.x,
        y: v.y,
        z: v.z,
    }
}

fn from_point3d(p: &Point3D) -> Vector3<f64> {
    Vector3::new(p.x, p.y, p.z)
}

fn to_row_major(m: &Matrix3<f64>) -> [f64; 9] {
    let mut data = [0.0; 9];
    for i in 0..3 {
        for j in 0..3 {
            data[i * 3 + j] = m[(i, j)];
        }
    }
    data
}

// =========================================================================
// == Course ==
// =========================================================================

impl From<&ObservationCourse> for ObservationCourseMsg {
    fn from(observation: &ObservationCourse) -> Self {
        Self {
            angle: observation.y(),
            std: observation.r().sqrt(),
        }
    }
}

impl ToWire for ObservationCourse {
    type Message = ObservationCourseStamped;

    fn to_wire(&self, stamp: Duration, frame_id: &str) -> ObservationCourseStamped {
        ObservationCourseStamped {
            header: make_header(stamp, frame_id),
            observation_course: self.into(),
        }
    }
}

impl ObservationMessage for ObservationCourseStamped {
    type Observation = ObservationCourse;

    fn stamp(&self) -> Duration {
        extract_duration(&self.header)
    }

    fn extract_obs(&self) -> ObservationCourse {
        let msg = &self.observation_course;
        ObservationCourse::new(msg.angle, msg.std * msg.std)
    }
}

// =========================================================================
// == Pose ==
// =========================================================================

impl From<&ObservationPose> for ObservationPose2DMsg {
    fn from(observation: &ObservationPose) -> Self {
        let y = observation.y();
        Self {
            pose: Pose2DMsg {
                position: Point2D {
                    x: y[ObservationPose::POSITION_X],
                    y: y[ObservationPose::POSITION_Y],
                },
                yaw: y[ObservationPose::ORIENTATION_Z],
                covariance: to_row_major(observation.r()),
            },
            level_arm: to_point3d(observation.level_arm()),
        }
    }
}

impl ToWire for ObservationPose {
    type Message = ObservationPose2DStamped;

    fn to_wire(&self, stamp: Duration, frame_id: &str) -> ObservationPose2DStamped {
        ObservationPose2DStamped {
            header: make_header(stamp, frame_id),
            observation_pose: self.into(),
        }
    }
}

/// A bare pose estimate goes out as a pose observation with no lever arm.
impl ToWire for Pose2D {
    type Message = ObservationPose2DStamped;

    fn to_wire(&self, stamp: Duration, frame_id: &str) -> ObservationPose2DStamped {
        ObservationPose2DStamped {
            header: make_header(stamp, frame_id),
            observation_pose: ObservationPose2DMsg {
                pose: Pose2DMsg {
                    position: Point2D {
                        x: self.position.x,
                        y: self.position.y,
                    },
                    yaw: self.yaw,
                    covariance: to_row_major(&self.covariance),
                },
                level_arm: Point3D::default(),
            },
        }
    }
}

impl ObservationMessage for ObservationPose2DStamped {
    type Observation = ObservationPose;

    fn stamp(&self) -> Duration {
        extract_duration(&self.header)
    }

    fn extract_obs(&self) -> ObservationPose {
        let pose = &self.observation_pose.pose;
        ObservationPose::new(
            Vector3::new(pose.position.x, pose.position.y, pose.yaw),
            Matrix3::from_row_slice(&pose.covariance),
            from_point3d(&self.observation_pose.level_arm),
        )
    }
}

// =========================================================================
// == Range ==
// =========================================================================

impl From<&ObservationRange> for ObservationRangeMsg {
    fn from(observation: &ObservationRange) -> Self {
        Self {
            range: observation.y(),
            std: observation.r().sqrt(),
            initiator_antenna_position: to_point3d(observation.initiator_antenna_position()),
            responder_antenna_position: to_point3d(observation.responder_antenna_position()),
        }
    }
}

impl ToWire for ObservationRange {
    type Message = ObservationRangeStamped;

    fn to_wire(&self, stamp: Duration, frame_id: &str) -> ObservationRangeStamped {
        ObservationRangeStamped {
            header: make_header(stamp, frame_id),
            observation_range: self.into(),
        }
    }
}

impl ObservationMessage for ObservationRangeStamped {
    type Observation = ObservationRange;

    fn stamp(&self) -> Duration {
        extract_duration(&self.header)
    }

    fn extract_obs(&self) -> ObservationRange {
        let msg = &self.observation_range;
        ObservationRange::new(
            msg.range,
            msg.std * msg.std,
            from_point3d(&msg.initiator_antenna_position),
            from_point3d(&msg.responder_antenna_position),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector2;

    const FRAME_ID: &str = "foo";

    fn stamp() -> Duration {
        Duration::from_nanos(1_000)
    }

    fn filled_covariance() -> Matrix3<f64> {
        Matrix3::from_fn(|i, j| (i * 3 + j + 1) as f64)
    }

    #[test]
    fn test_course_to_wire() {
        let observation = ObservationCourse::new(1.0, 4.0);
        let msg = observation.to_wire(stamp(), FRAME_ID);

        assert_eq!(extract_duration(&msg.header), stamp());
        assert_eq!(msg.header.frame_id, FRAME_ID);
        assert_eq!(msg.observation_course.angle, 1.0);
        assert_eq!(msg.observation_course.std, 2.0);
    }

    #[test]
    fn test_course_from_wire() {
        let msg = ObservationCourseStamped {
            header: make_header(stamp(), FRAME_ID),
            observation_course: ObservationCourseMsg {
                angle: 1.0,
                std: 2.0,
            },
        };
        let (observation, timestamp) = from_wire(&msg);

        assert_eq!(timestamp, stamp());
        assert_eq!(observation.y(), 1.0);
        assert_eq!(observation.r(), 4.0);
    }

    #[test]
    fn test_course_round_trip_keeps_variance() {
        let observation = ObservationCourse::new(-0.3, 0.0123);
        let (back, _) = from_wire(&observation.to_wire(stamp(), FRAME_ID));
        assert_abs_diff_eq!(back.y(), observation.y());
        assert_abs_diff_eq!(back.r(), observation.r(), epsilon = 1e-15);
    }

    #[test]
    fn test_pose_to_wire() {
        let observation = ObservationPose::new(
            Vector3::new(1.0, 2.0, 3.0),
            filled_covariance(),
            Vector3::new(4.0, 5.0, 6.0),
        );
        let msg = observation.to_wire(stamp(), FRAME_ID);
        let wire = &msg.observation_pose;

        assert_eq!(extract_duration(&msg.header), stamp());
        assert_eq!(msg.header.frame_id, FRAME_ID);
        assert_eq!(wire.pose.position.x, 1.0);
        assert_eq!(wire.pose.position.y, 2.0);
        assert_eq!(wire.pose.yaw, 3.0);
        assert_eq!(wire.level_arm, Point3D { x: 4.0, y: 5.0, z: 6.0 });
        assert_eq!(wire.pose.covariance, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_pose_from_wire() {
        let observation = ObservationPose::new(
            Vector3::new(1.0, 2.0, 3.0),
            filled_covariance(),
            Vector3::new(4.0, 5.0, 6.0),
        );
        let (back, timestamp) = from_wire(&observation.to_wire(stamp(), FRAME_ID));

        assert_eq!(timestamp, stamp());
        assert_eq!(back, observation);
    }

    #[test]
    fn test_pose2d_to_wire_has_no_level_arm() {
        let pose = Pose2D {
            position: Vector2::new(1.0, 2.0),
            yaw: 3.0,
            covariance: filled_covariance(),
        };
        let msg = pose.to_wire(stamp(), FRAME_ID);
        let wire = &msg.observation_pose;

        assert_eq!(wire.pose.position.x, 1.0);
        assert_eq!(wire.pose.position.y, 2.0);
        assert_eq!(wire.pose.yaw, 3.0);
        assert_eq!(wire.level_arm, Point3D::default());
        assert_eq!(msg.extract_obs().r(), &pose.covariance);
    }

    #[test]
    fn test_range_std_is_sqrt_of_variance() {
        let observation = ObservationRange::new(
            12.5,
            0.09,
            Vector3::new(0.1, 0.0, 1.2),
            Vector3::new(10.0, -3.0, 2.0),
        );
        let msg = observation.to_wire(stamp(), FRAME_ID);
        assert_abs_diff_eq!(msg.observation_range.std, 0.3, epsilon = 1e-12);
        assert_eq!(msg.observation_range.range, 12.5);

        let back = msg.extract_obs();
        assert_abs_diff_eq!(back.r(), 0.09, epsilon = 1e-12);
        assert_eq!(back.initiator_antenna_position(), observation.initiator_antenna_position());
        assert_eq!(back.responder_antenna_position(), observation.responder_antenna_position());
    }

    #[test]
    fn test_stamp_keeps_nanoseconds() {
        let stamp = Duration::new(1_700_000_000, 123_456_789);
        let msg = ObservationCourse::new(0.0, 1.0).to_wire(stamp, FRAME_ID);
        assert_eq!(msg.header.stamp.sec, 1_700_000_000);
        assert_eq!(msg.header.stamp.nanosec, 123_456_789);
        assert_eq!(msg.stamp(), stamp);
    }

    #[test]
    fn test_stamp_after_2038_round_trips() {
        let stamp = Duration::new(3_000_000_000, 42);
        let observation = ObservationCourse::new(0.25, 1.0);
        let (_, timestamp) = from_wire(&observation.to_wire(stamp, FRAME_ID));
        assert_eq!(timestamp, stamp);
    }
}
