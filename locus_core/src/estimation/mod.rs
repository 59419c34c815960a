// locus_core/src/estimation/mod.rs

use std::fmt;
use std::time::Duration;

/// The result of applying one observation to the belief state.
///
/// Rejection and skipping are normal steady-state outcomes, not errors; the
/// belief state is left untouched by the operation that produced them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateOutcome {
    Accepted { mahalanobis_distance: f64 },
    /// The observation failed the outlier gate.
    Rejected { mahalanobis_distance: f64 },
    /// The updater chose not to use the observation (trigger policy,
    /// degenerate geometry).
    Skipped,
}

impl UpdateOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UpdateOutcome::Accepted { .. })
    }
}

/// A deferred update, bound to one observation and one updater.
///
/// Built once per received message, handed to `Filter::process`, and consumed
/// by `apply`. The lifetime ties the operation to the updater it borrows.
pub struct UpdateOperation<'a, S> {
    apply: Box<dyn FnOnce(&mut S, Duration) -> UpdateOutcome + Send + 'a>,
}

impl<'a, S> UpdateOperation<'a, S> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&mut S, Duration) -> UpdateOutcome + Send + 'a,
    {
        Self { apply: Box::new(f) }
    }

    pub fn apply(self, state: &mut S, timestamp: Duration) -> UpdateOutcome {
        (self.apply)(state, timestamp)
    }
}

impl<S> fmt::Debug for UpdateOperation<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateOperation").finish_non_exhaustive()
    }
}

/// The contract of the shared estimator.
///
/// Implementations must apply operations one at a time against their state,
/// whatever the number of threads calling `process` concurrently. The order in
/// which concurrent calls are accepted is up to the implementation.
pub trait Filter: Send + Sync {
    type State;

    fn process(&self, timestamp: Duration, operation: UpdateOperation<'_, Self::State>);
}

/// A belief state that can be carried forward in time before an update.
pub trait BeliefState: Send {
    /// Propagates the state by `dt`. Called before applying an update whose
    /// timestamp is newer than the last applied one.
    fn predict(&mut self, dt: Duration);

    /// Estimated planar position, when the state has one.
    fn position(&self) -> Option<(f64, f64)> {
        None
    }

    /// Radius of the circle expected to hold half of the position error.
    fn circular_error_probable(&self) -> Option<f64> {
        None
    }
}

pub mod filters;
pub mod state;
