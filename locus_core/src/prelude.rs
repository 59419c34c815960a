// locus_core/src/prelude.rs

// --- Core Abstractions (The main contracts of the library) ---
pub use crate::bridge::{MessageDelivery, QosProfile, UpdaterInterface};
pub use crate::conversions::{from_wire, ObservationMessage, ToWire};
pub use crate::estimation::{BeliefState, Filter, UpdateOperation, UpdateOutcome};
pub use crate::updaters::Updater;

// --- Core Data Structures (The "nouns" of the library) ---
pub use crate::diagnostics::{Diagnostic, DiagnosticReport, DiagnosticStatus};
pub use crate::estimation::state::PlanarState;
pub use crate::observations::{ObservationCourse, ObservationPose, ObservationRange, Pose2D};

// --- Wiring ---
pub use crate::bridge::builder::BridgeBuilder;
pub use crate::bridge::factory::make_update_bridge;
pub use crate::bridge::UpdateBridge;
pub use crate::estimation::filters::serialized::SerializedFilter;

// --- Concrete Updaters (Export common ones for convenience) ---
pub use crate::updaters::{CourseUpdater, PoseUpdater, RangeUpdater};
