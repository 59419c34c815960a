// locus_core/src/estimation/filters/serialized.rs

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use crate::diagnostics::{DiagnosticReport, DiagnosticStatus};
use crate::estimation::{BeliefState, Filter, UpdateOperation, UpdateOutcome};
use crate::params::{FilterParameters, PredictorParameters};

/// One entry of the filter's update history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessedUpdate {
    pub timestamp: Duration,
    pub outcome: UpdateOutcome,
}

struct FilterCore<S> {
    state: S,
    last_timestamp: Option<Duration>,
    history: VecDeque<ProcessedUpdate>,
}

/// What the report needs, published after every update so that reading it
/// never waits for the state lock.
#[derive(Debug, Default)]
struct FilterStatus {
    last_accepted: Option<Duration>,
    accepted: u64,
    rejected: u64,
    skipped: u64,
    /// Distance covered by prediction alone since the last accepted update.
    dead_reckoning_distance: f64,
    circular_error_probable: Option<f64>,
}

/// A filter that serialises every update behind a single lock.
///
/// Each call to `process` predicts the state forward to the operation's
/// timestamp (when it is newer than the last one applied), then applies the
/// operation. Concurrent callers wait for the lock; they are served in
/// whatever order the lock grants it.
pub struct SerializedFilter<S> {
    core: Mutex<FilterCore<S>>,
    // Lock order: `core` before `status`.
    status: Mutex<FilterStatus>,
    parameters: FilterParameters,
    predictor: PredictorParameters,
}

impl<S: BeliefState> SerializedFilter<S> {
    /// A `state_pool_size` of zero still keeps the latest update.
    pub fn new(
        initial_state: S,
        parameters: FilterParameters,
        predictor: PredictorParameters,
    ) -> Self {
        let pool_size = parameters.state_pool_size.max(1);
        Self {
            core: Mutex::new(FilterCore {
                state: initial_state,
                last_timestamp: None,
                history: VecDeque::with_capacity(pool_size.min(1024)),
            }),
            status: Mutex::new(FilterStatus::default()),
            parameters,
            predictor,
        }
    }

    /// Runs `f` against the current state while holding the filter lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.core.lock().state)
    }

    pub fn snapshot(&self) -> S
    where
        S: Clone,
    {
        self.with_state(S::clone)
    }

    /// The most recent updates, oldest first, bounded by the state pool size.
    pub fn history(&self) -> Vec<ProcessedUpdate> {
        self.core.lock().history.iter().copied().collect()
    }

    pub fn last_update_timestamp(&self) -> Option<Duration> {
        self.core.lock().last_timestamp
    }

    /// Reports whether the estimate is still backed by recent observations.
    ///
    /// Checks the time and distance spent dead reckoning and the circular
    /// error probable against the predictor limits. Does not wait for an
    /// update in progress.
    pub fn get_report(&self, now: Duration) -> DiagnosticReport {
        let status = self.status.lock();
        let predictor = &self.predictor;
        let mut report = DiagnosticReport::default();

        match status.last_accepted {
            None => report.push(
                DiagnosticStatus::Stale,
                "localisation: no observation applied yet",
            ),
            Some(last) => {
                let mut warnings = Vec::new();

                let elapsed = now.saturating_sub(last).as_secs_f64();
                if elapsed > predictor.maximal_dead_reckoning_elapsed_time {
                    warnings.push(format!(
                        "localisation: dead reckoning for {:.2}s (max {:.2}s)",
                        elapsed, predictor.maximal_dead_reckoning_elapsed_time
                    ));
                }
                let travelled = status.dead_reckoning_distance;
                if travelled > predictor.maximal_dead_reckoning_travelled_distance {
                    warnings.push(format!(
                        "localisation: dead reckoning travelled {:.2}m (max {:.2}m)",
                        travelled, predictor.maximal_dead_reckoning_travelled_distance
                    ));
                }
                if let Some(cep) = status.circular_error_probable {
                    if cep > predictor.maximal_circular_error_probable {
                        warnings.push(format!(
                            "localisation: circular error probable {:.2}m (max {:.2}m)",
                            cep, predictor.maximal_circular_error_probable
                        ));
                    }
                }

                if warnings.is_empty() {
                    report.push(DiagnosticStatus::Ok, "localisation: ok");
                }
                for warning in warnings {
                    report.push(DiagnosticStatus::Warn, warning);
                }
            }
        }

        report.set_info("filter.accepted", status.accepted);
        report.set_info("filter.rejected", status.rejected);
        report.set_info("filter.skipped", status.skipped);
        report.set_info(
            "filter.dead_reckoning_distance",
            format!("{:.3}", status.dead_reckoning_distance),
        );
        if let Some(cep) = status.circular_error_probable {
            report.set_info("filter.circular_error_probable", format!("{cep:.3}"));
        }
        report
    }
}

fn distance(from: Option<(f64, f64)>, to: Option<(f64, f64)>) -> f64 {
    match (from, to) {
        (Some((x0, y0)), Some((x1, y1))) => (x1 - x0).hypot(y1 - y0),
        _ => 0.0,
    }
}

impl<S: BeliefState> Filter for SerializedFilter<S> {
    type State = S;

    fn process(&self, timestamp: Duration, operation: UpdateOperation<'_, S>) {
        let mut core = self.core.lock();

        let mut travelled = 0.0;
        if let Some(last) = core.last_timestamp {
            if timestamp > last {
                let before = core.state.position();
                core.state.predict(timestamp - last);
                travelled = distance(before, core.state.position());
            }
        }

        let outcome = operation.apply(&mut core.state, timestamp);

        core.last_timestamp = Some(core.last_timestamp.map_or(timestamp, |t| t.max(timestamp)));
        while core.history.len() >= self.parameters.state_pool_size.max(1) {
            core.history.pop_front();
        }
        core.history.push_back(ProcessedUpdate { timestamp, outcome });

        let mut status = self.status.lock();
        status.dead_reckoning_distance += travelled;
        match outcome {
            UpdateOutcome::Accepted { .. } => {
                status.accepted += 1;
                status.last_accepted = Some(timestamp);
                status.dead_reckoning_distance = 0.0;
            }
            UpdateOutcome::Rejected { .. } => status.rejected += 1,
            UpdateOutcome::Skipped => status.skipped += 1,
        }
        status.circular_error_probable = core.state.circular_error_probable();
    }
}
