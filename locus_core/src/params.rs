// locus_core/src/params.rs

//! The configuration surface consumed by updaters and filters.
//!
//! Raw values (`UpdaterConfig`, `PredictorParameters`, `FilterParameters`)
//! deserialize straight from a config file. They are validated once at
//! startup into the parameter structs that updaters take; nothing here is
//! re-read at runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// =========================================================================
// == Trigger Mode ==
// =========================================================================

/// When an updater is allowed to apply its observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Every qualifying observation is applied.
    #[default]
    Always,
    /// Only the first accepted observation is applied; later ones are skipped.
    Once,
}

impl FromStr for TriggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(TriggerMode::Always),
            "once" => Ok(TriggerMode::Once),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerMode::Always => f.write_str("always"),
            TriggerMode::Once => f.write_str("once"),
        }
    }
}

// =========================================================================
// == Updater Parameters ==
// =========================================================================

/// Per-source parameters as they appear in the config file.
///
/// `minimal_rate` is kept signed so that a negative value can be reported
/// with the updater's name instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdaterConfig {
    pub topic: String,
    pub minimal_rate: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mahalanobis_distance_rejection_threshold: Option<f64>,
}

impl UpdaterConfig {
    /// Defaults for an exteroceptive source (GNSS, compass, ranging).
    pub fn exteroceptive(
        topic: impl Into<String>,
        default_minimal_rate: u32,
        default_trigger_mode: TriggerMode,
        default_mahalanobis_distance_rejection_threshold: f64,
    ) -> Self {
        Self {
            topic: topic.into(),
            minimal_rate: default_minimal_rate as i64,
            trigger: Some(default_trigger_mode.to_string()),
            mahalanobis_distance_rejection_threshold: Some(
                default_mahalanobis_distance_rejection_threshold,
            ),
        }
    }

    pub fn minimal_rate(&self, updater_name: &str) -> Result<u32, ConfigError> {
        get_updater_minimal_rate(updater_name, self.minimal_rate)
    }

    pub fn trigger_mode(&self, updater_name: &str) -> Result<TriggerMode, ConfigError> {
        match &self.trigger {
            None => Ok(TriggerMode::default()),
            Some(value) => value
                .parse()
                .map_err(|value| ConfigError::InvalidTriggerMode {
                    updater: updater_name.to_string(),
                    value,
                }),
        }
    }

    pub fn mahalanobis_distance_rejection_threshold(
        &self,
        updater_name: &str,
    ) -> Result<f64, ConfigError> {
        let value = self
            .mahalanobis_distance_rejection_threshold
            .ok_or_else(|| ConfigError::InvalidParameter {
                name: format!("{updater_name}.mahalanobis_distance_rejection_threshold"),
                reason: "required for exteroceptive updaters".to_string(),
            })?;
        if !value.is_finite() || value <= 0.0 {
            return Err(ConfigError::InvalidThreshold {
                updater: updater_name.to_string(),
                value,
            });
        }
        Ok(value)
    }

    pub fn to_exteroceptive(
        &self,
        updater_name: &str,
    ) -> Result<ExteroceptiveParameters, ConfigError> {
        Ok(ExteroceptiveParameters {
            name: updater_name.to_string(),
            topic: self.topic.clone(),
            minimal_rate: self.minimal_rate(updater_name)?,
            trigger: self.trigger_mode(updater_name)?,
            mahalanobis_distance_rejection_threshold: self
                .mahalanobis_distance_rejection_threshold(updater_name)?,
        })
    }
}

/// Rejects negative rates instead of clamping them.
pub fn get_updater_minimal_rate(updater_name: &str, minimal_rate: i64) -> Result<u32, ConfigError> {
    u32::try_from(minimal_rate).map_err(|_| ConfigError::InvalidMinimalRate {
        updater: updater_name.to_string(),
        value: minimal_rate,
    })
}

/// Validated parameters of an updater fed by an exteroceptive sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExteroceptiveParameters {
    pub name: String,
    pub topic: String,
    /// In Hz. Zero disables the liveness check.
    pub minimal_rate: u32,
    pub trigger: TriggerMode,
    pub mahalanobis_distance_rejection_threshold: f64,
}

// =========================================================================
// == Predictor & Filter Parameters ==
// =========================================================================

/// Bounds on how long the filter may run on prediction alone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PredictorParameters {
    /// In meters.
    pub maximal_dead_reckoning_travelled_distance: f64,
    /// In seconds.
    pub maximal_dead_reckoning_elapsed_time: f64,
    /// In meters.
    pub maximal_circular_error_probable: f64,
}

impl Default for PredictorParameters {
    fn default() -> Self {
        Self {
            maximal_dead_reckoning_travelled_distance: 20.0,
            maximal_dead_reckoning_elapsed_time: 10.0,
            maximal_circular_error_probable: 10.0,
        }
    }
}

impl PredictorParameters {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            (
                "predictor.maximal_dead_reckoning_travelled_distance",
                self.maximal_dead_reckoning_travelled_distance,
            ),
            (
                "predictor.maximal_dead_reckoning_elapsed_time",
                self.maximal_dead_reckoning_elapsed_time,
            ),
            (
                "predictor.maximal_circular_error_probable",
                self.maximal_circular_error_probable,
            ),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidParameter {
                    name: name.to_string(),
                    reason: format!("{value} is not a finite, non-negative number"),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterParameters {
    /// Number of past updates the filter keeps.
    pub state_pool_size: usize,
    /// Particle filters only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_particles: Option<usize>,
}

impl Default for FilterParameters {
    fn default() -> Self {
        Self {
            state_pool_size: 1000,
            number_of_particles: None,
        }
    }
}

impl FilterParameters {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_pool_size == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "filter.state_pool_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.number_of_particles == Some(0) {
            return Err(ConfigError::InvalidParameter {
                name: "filter.number_of_particles".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
