// locus_core/src/error.rs

use thiserror::Error;

/// Errors raised while turning configuration values into validated parameters.
/// These are fatal to the setup of the source they belong to.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid minimal rate for updater {updater}: {value} (must be >= 0)")]
    InvalidMinimalRate { updater: String, value: i64 },

    #[error("Invalid trigger mode for updater {updater}: '{value}' (expected 'always' or 'once')")]
    InvalidTriggerMode { updater: String, value: String },

    #[error("Invalid rejection threshold for updater {updater}: {value} (must be positive)")]
    InvalidThreshold { updater: String, value: f64 },

    #[error("Missing configuration for updater {updater}")]
    MissingUpdater { updater: String },

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },
}

/// Errors raised while wiring an update bridge. All of them are
/// construction-time failures; a built bridge never produces one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("No updater loaded for channel '{channel}'")]
    MissingUpdater { channel: String },

    #[error("No filter registered for channel '{channel}'")]
    MissingFilter { channel: String },

    #[error("Failed to subscribe to channel '{channel}': {reason}")]
    Subscription { channel: String, reason: String },
}
