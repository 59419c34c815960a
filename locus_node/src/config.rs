// locus_node/src/config.rs

//! Node configuration: one TOML file merged over built-in defaults.

use std::collections::BTreeMap;
use std::path::Path;

use figment::providers::{Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use locus_core::error::ConfigError;
use locus_core::params::{
    ExteroceptiveParameters, FilterParameters, PredictorParameters, TriggerMode, UpdaterConfig,
};

pub const COURSE: &str = "course";
pub const POSE: &str = "pose";
pub const RANGE: &str = "range";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read configuration: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

impl From<figment::Error> for LoadError {
    fn from(e: figment::Error) -> Self {
        LoadError::Figment(Box::new(e))
    }
}

// =========================================================================
// == Top-Level Configuration ==
// =========================================================================

/// The root of a `locus.toml` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub predictor: PredictorParameters,
    #[serde(default)]
    pub filter: FilterParameters,
    /// Keyed by updater name.
    #[serde(default)]
    pub updaters: BTreeMap<String, UpdaterConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let updaters = [
            (COURSE, UpdaterConfig::exteroceptive(COURSE, 5, TriggerMode::Always, 5.0)),
            (POSE, UpdaterConfig::exteroceptive(POSE, 1, TriggerMode::Always, 5.0)),
            (RANGE, UpdaterConfig::exteroceptive(RANGE, 5, TriggerMode::Always, 5.0)),
        ]
        .into_iter()
        .map(|(name, config)| (name.to_string(), config))
        .collect();

        Self {
            simulation: SimulationConfig::default(),
            predictor: PredictorParameters::default(),
            filter: FilterParameters::default(),
            updaters,
        }
    }
}

impl NodeConfig {
    /// Loads `path` over the defaults. A missing file leaves the defaults as
    /// they are.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        Self::from_figment(Self::figment().merge(Toml::file(path)))
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, LoadError> {
        Self::from_figment(Self::figment().merge(Toml::string(toml)))
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(NodeConfig::default()))
    }

    fn from_figment(figment: Figment) -> Result<Self, LoadError> {
        let config: NodeConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every section so that a bad value fails at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.predictor.validate()?;
        self.filter.validate()?;
        self.simulation.validate()?;
        for name in self.updaters.keys() {
            self.exteroceptive(name)?;
        }
        Ok(())
    }

    pub fn exteroceptive(&self, name: &str) -> Result<ExteroceptiveParameters, ConfigError> {
        self.updaters
            .get(name)
            .ok_or_else(|| ConfigError::MissingUpdater {
                updater: name.to_string(),
            })?
            .to_exteroceptive(name)
    }

    pub fn topic(&self, name: &str) -> Result<&str, ConfigError> {
        self.updaters
            .get(name)
            .map(|updater| updater.topic.as_str())
            .ok_or_else(|| ConfigError::MissingUpdater {
                updater: name.to_string(),
            })
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

// =========================================================================
// == Simulation Sub-Structs ==
// =========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Optional seed for the pseudo-random number generator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// In seconds.
    pub duration_seconds: f64,
    /// Period of the health check, in seconds.
    pub health_period: f64,
    pub trajectory: TrajectoryConfig,
    pub initial_state: InitialStateConfig,
    pub course: SensorConfig,
    pub pose: PoseSensorConfig,
    pub range: RangeSensorConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: None,
            duration_seconds: 10.0,
            health_period: 1.0,
            trajectory: TrajectoryConfig::default(),
            initial_state: InitialStateConfig::default(),
            course: SensorConfig {
                rate: 10.0,
                noise_std: 0.02,
            },
            pose: PoseSensorConfig::default(),
            range: RangeSensorConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("simulation.duration_seconds", self.duration_seconds),
            ("simulation.health_period", self.health_period),
            ("simulation.course.rate", self.course.rate),
            ("simulation.pose.rate", self.pose.rate),
            ("simulation.range.rate", self.range.rate),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(name, format!("{value} must be positive")));
            }
        }

        let non_negative = [
            ("simulation.course.noise_std", self.course.noise_std),
            ("simulation.pose.noise_std", self.pose.noise_std),
            ("simulation.pose.yaw_noise_std", self.pose.yaw_noise_std),
            ("simulation.range.noise_std", self.range.noise_std),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(name, format!("{value} must be non-negative")));
            }
        }

        if self.range.anchors.is_empty() {
            return Err(invalid(
                "simulation.range.anchors",
                "at least one anchor is required".into(),
            ));
        }
        Ok(())
    }
}

fn invalid(name: &str, reason: String) -> ConfigError {
    ConfigError::InvalidParameter {
        name: name.to_string(),
        reason,
    }
}

/// A circle centred on the origin, driven counter-clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrajectoryConfig {
    /// In meters.
    pub radius: f64,
    /// In rad/s.
    pub angular_speed: f64,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            radius: 10.0,
            angular_speed: 0.1,
        }
    }
}

/// Prior and process noise of the planar filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitialStateConfig {
    /// `[x, y, yaw]` standard deviations of the prior around the true start.
    pub std: [f64; 3],
    /// `[x, y, yaw]` random-walk noise densities, per second.
    pub process_noise: [f64; 3],
}

impl Default for InitialStateConfig {
    fn default() -> Self {
        Self {
            std: [1.0, 1.0, 0.2],
            process_noise: [1.0, 1.0, 0.01],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    /// In Hz.
    pub rate: f64,
    pub noise_std: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoseSensorConfig {
    /// In Hz.
    pub rate: f64,
    /// Position noise, in meters.
    pub noise_std: f64,
    /// In radians.
    pub yaw_noise_std: f64,
    /// Antenna offset in the body frame.
    pub level_arm: [f64; 3],
}

impl Default for PoseSensorConfig {
    fn default() -> Self {
        Self {
            rate: 2.0,
            noise_std: 0.3,
            yaw_noise_std: 0.05,
            level_arm: [0.5, 0.0, 1.5],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeSensorConfig {
    /// In Hz, over all anchors.
    pub rate: f64,
    pub noise_std: f64,
    /// Initiator antenna in the body frame.
    pub initiator: [f64; 3],
    /// Responder antennas in the world frame, polled in turn.
    pub anchors: Vec<[f64; 3]>,
}

impl Default for RangeSensorConfig {
    fn default() -> Self {
        Self {
            rate: 10.0,
            noise_std: 0.1,
            initiator: [0.0, 0.0, 1.0],
            anchors: vec![
                [15.0, 15.0, 2.0],
                [-15.0, 15.0, 2.0],
                [-15.0, -15.0, 2.0],
                [15.0, -15.0, 2.0],
            ],
        }
    }
}
