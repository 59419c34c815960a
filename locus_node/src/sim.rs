// locus_node/src/sim.rs

//! Synthetic sensor sources driven by a known ground-truth trajectory.

use std::f64::consts::FRAC_PI_2;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nalgebra::{Matrix3, Vector3};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use tracing::{error, info};

use locus_core::conversions::ToWire;
use locus_core::error::ConfigError;
use locus_core::estimation::state::wrap_angle;
use locus_core::observations::{ObservationCourse, ObservationPose, ObservationRange};

use crate::bus::MessageBus;
use crate::clock::Clock;
use crate::config::{SimulationConfig, TrajectoryConfig};

const FRAME_ID: &str = "base_link";

// =========================================================================
// == Ground Truth ==
// =========================================================================

/// Constant-speed motion on a circle around the origin, heading tangent to it.
#[derive(Debug, Clone, Copy)]
pub struct GroundTruth {
    radius: f64,
    angular_speed: f64,
}

impl GroundTruth {
    pub fn new(trajectory: &TrajectoryConfig) -> Self {
        Self {
            radius: trajectory.radius,
            angular_speed: trajectory.angular_speed,
        }
    }

    /// `[x, y, yaw]` at `t` seconds after start.
    pub fn pose_at(&self, t: f64) -> Vector3<f64> {
        let angle = self.angular_speed * t;
        let heading = if self.angular_speed < 0.0 { -FRAC_PI_2 } else { FRAC_PI_2 };
        Vector3::new(
            self.radius * angle.cos(),
            self.radius * angle.sin(),
            wrap_angle(angle + heading),
        )
    }

    /// A body-frame point expressed in the world frame at `t`.
    pub fn body_to_world(&self, t: f64, point: &Vector3<f64>) -> Vector3<f64> {
        let pose = self.pose_at(t);
        let (sin, cos) = pose.z.sin_cos();
        Vector3::new(
            pose.x + cos * point.x - sin * point.y,
            pose.y + sin * point.x + cos * point.y,
            point.z,
        )
    }
}

// =========================================================================
// == Sensors ==
// =========================================================================

/// Topics the synthetic sources publish on.
#[derive(Debug, Clone)]
pub struct SensorTopics {
    pub course: String,
    pub pose: String,
    pub range: String,
}

pub struct SyntheticSensors {
    config: SimulationConfig,
    truth: GroundTruth,
    rng: ChaCha8Rng,
    course_noise: Normal<f64>,
    pose_noise: Normal<f64>,
    yaw_noise: Normal<f64>,
    range_noise: Normal<f64>,
    next_anchor: usize,
}

fn noise(name: &str, std: f64) -> Result<Normal<f64>, ConfigError> {
    Normal::new(0.0, std).map_err(|e| ConfigError::InvalidParameter {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

impl SyntheticSensors {
    pub fn new(config: SimulationConfig, rng: ChaCha8Rng) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            truth: GroundTruth::new(&config.trajectory),
            rng,
            course_noise: noise("simulation.course.noise_std", config.course.noise_std)?,
            pose_noise: noise("simulation.pose.noise_std", config.pose.noise_std)?,
            yaw_noise: noise("simulation.pose.yaw_noise_std", config.pose.yaw_noise_std)?,
            range_noise: noise("simulation.range.noise_std", config.range.noise_std)?,
            next_anchor: 0,
            config,
        })
    }

    pub fn truth(&self) -> &GroundTruth {
        &self.truth
    }

    pub fn sample_course(&mut self, t: f64) -> ObservationCourse {
        let yaw = self.truth.pose_at(t).z;
        let std = self.config.course.noise_std;
        ObservationCourse::new(
            wrap_angle(yaw + self.course_noise.sample(&mut self.rng)),
            std * std,
        )
    }

    /// The pose of the antenna at the lever arm, not of the body origin.
    pub fn sample_pose(&mut self, t: f64) -> ObservationPose {
        let pose = &self.config.pose;
        let level_arm = Vector3::from(pose.level_arm);
        let antenna = self.truth.body_to_world(t, &level_arm);
        let yaw = self.truth.pose_at(t).z;

        let y = Vector3::new(
            antenna.x + self.pose_noise.sample(&mut self.rng),
            antenna.y + self.pose_noise.sample(&mut self.rng),
            wrap_angle(yaw + self.yaw_noise.sample(&mut self.rng)),
        );
        let r = Matrix3::from_diagonal(&Vector3::new(
            pose.noise_std.powi(2),
            pose.noise_std.powi(2),
            pose.yaw_noise_std.powi(2),
        ));
        ObservationPose::new(y, r, level_arm)
    }

    /// Ranges to the configured anchors, one anchor per call in turn.
    pub fn sample_range(&mut self, t: f64) -> ObservationRange {
        let range = &self.config.range;
        let anchor = Vector3::from(range.anchors[self.next_anchor % range.anchors.len()]);
        self.next_anchor = (self.next_anchor + 1) % range.anchors.len();

        let initiator = Vector3::from(range.initiator);
        let distance = (self.truth.body_to_world(t, &initiator) - anchor).norm();
        ObservationRange::new(
            distance + self.range_noise.sample(&mut self.rng),
            range.noise_std.powi(2),
            initiator,
            anchor,
        )
    }

    /// Publishes every source at its configured rate until `running` is
    /// cleared. Stamps are `clock.now()` at start plus the elapsed time.
    pub fn spawn(
        mut self,
        bus: MessageBus,
        topics: SensorTopics,
        clock: Arc<dyn Clock>,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<SensorThread> {
        let handle = thread::Builder::new()
            .name("sensors".into())
            .spawn(move || {
                info!(
                    "Sensor thread started: '{}', '{}', '{}'",
                    topics.course, topics.pose, topics.range
                );
                let start_stamp = clock.now();
                let started = Instant::now();
                let periods = [
                    1.0 / self.config.course.rate,
                    1.0 / self.config.pose.rate,
                    1.0 / self.config.range.rate,
                ];
                let mut next_due = [0.0; 3];
                let mut published = 0_u64;

                while running.load(Ordering::Relaxed) {
                    let t = started.elapsed().as_secs_f64();
                    let stamp = start_stamp + Duration::from_secs_f64(t);

                    for (sensor, due) in next_due.iter_mut().enumerate() {
                        if t < *due {
                            continue;
                        }
                        let result = match sensor {
                            0 => {
                                let msg = self.sample_course(t).to_wire(stamp, FRAME_ID);
                                bus.publish(&topics.course, msg)
                            }
                            1 => {
                                let msg = self.sample_pose(t).to_wire(stamp, FRAME_ID);
                                bus.publish(&topics.pose, msg)
                            }
                            _ => {
                                let msg = self.sample_range(t).to_wire(stamp, FRAME_ID);
                                bus.publish(&topics.range, msg)
                            }
                        };
                        if let Err(e) = result {
                            error!("Failed to publish synthetic observation: {}", e);
                        }
                        published += 1;
                        *due += periods[sensor];
                    }

                    let earliest = next_due.iter().copied().fold(f64::INFINITY, f64::min);
                    let wait = (earliest - started.elapsed().as_secs_f64()).clamp(0.0, 0.005);
                    thread::sleep(Duration::from_secs_f64(wait));
                }
                info!("Sensor thread stopped after {} observations", published);
            })?;
        Ok(SensorThread { handle })
    }
}

/// Handle to the sensor thread.
pub struct SensorThread {
    handle: JoinHandle<()>,
}

impl SensorThread {
    pub fn join(self) {
        if let Err(e) = self.handle.join() {
            error!("Sensor thread panicked: {:?}", e);
        }
    }
}
