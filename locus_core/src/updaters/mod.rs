// locus_core/src/updaters/mod.rs

use std::time::Duration;

use nalgebra::{DMatrix, DVector};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::diagnostics::{DiagnosticReport, DiagnosticStatus, RateMonitor};
use crate::estimation::state::PlanarState;
use crate::estimation::UpdateOutcome;
use crate::params::{ExteroceptiveParameters, TriggerMode};

// =========================================================================
// == Updater Contract ==
// =========================================================================

/// Domain logic that decides whether and how an observation is applied to the
/// filter state.
///
/// `update` runs inside the filter's serialisation domain. `heartbeat_callback`
/// and `get_report` may be called from any thread at the same time, so an
/// updater keeps its bookkeeping behind its own short-lived lock and never
/// holds it while computing an update.
pub trait Updater: Send + Sync {
    type Observation: Send;
    type State;

    fn update(
        &self,
        state: &mut Self::State,
        observation: Self::Observation,
        timestamp: Duration,
    ) -> UpdateOutcome;

    /// Returns whether the source is alive at time `now`.
    fn heartbeat_callback(&self, now: Duration) -> bool;

    fn get_report(&self) -> DiagnosticReport;
}

// =========================================================================
// == Observation Models ==
// =========================================================================

/// A linearised measurement `z = h(x) + v` against the planar state.
#[derive(Debug, Clone)]
pub struct Linearisation {
    /// `z - h(x)`, angular components wrapped.
    pub innovation: DVector<f64>,
    /// `H = ∂h/∂x`, `m x 3`.
    pub h_jac: DMatrix<f64>,
    /// `R`, `m x m`.
    pub r_mat: DMatrix<f64>,
}

/// Maps one observation modality onto the planar state.
pub trait ObservationModel: Send + Sync {
    type Observation: Send;

    /// Short label used in logs and diagnostics.
    fn label(&self) -> &'static str;

    /// Returns `None` when the observation cannot be linearised at this state.
    fn linearise(&self, state: &PlanarState, observation: &Self::Observation)
        -> Option<Linearisation>;
}

// =========================================================================
// == Kalman Updater ==
// =========================================================================

/// Mutable bookkeeping of an updater, guarded separately from the filter.
#[derive(Debug)]
struct UpdaterStatus {
    rate: RateMonitor,
    alive: Option<bool>,
    last_heartbeat: Option<Duration>,
    triggered: bool,
    accepted: u64,
    rejected: u64,
    skipped: u64,
    last_mahalanobis_distance: Option<f64>,
}

/// An exteroceptive updater: Kalman update over `PlanarState`, gated by a
/// Mahalanobis distance threshold, with trigger policy and rate-based
/// liveness.
pub struct KalmanUpdater<M> {
    model: M,
    parameters: ExteroceptiveParameters,
    status: Mutex<UpdaterStatus>,
}

impl<M: ObservationModel> KalmanUpdater<M> {
    pub fn new(model: M, parameters: ExteroceptiveParameters) -> Self {
        let rate = RateMonitor::new(parameters.minimal_rate);
        Self {
            model,
            parameters,
            status: Mutex::new(UpdaterStatus {
                rate,
                alive: None,
                last_heartbeat: None,
                triggered: false,
                accepted: 0,
                rejected: 0,
                skipped: 0,
                last_mahalanobis_distance: None,
            }),
        }
    }

    pub fn parameters(&self) -> &ExteroceptiveParameters {
        &self.parameters
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

impl<M: ObservationModel> Updater for KalmanUpdater<M> {
    type Observation = M::Observation;
    type State = PlanarState;

    fn update(
        &self,
        state: &mut PlanarState,
        observation: M::Observation,
        timestamp: Duration,
    ) -> UpdateOutcome {
        // Only `update` writes `triggered`, and the filter never runs two
        // updates of one updater at once.
        let already_triggered =
            self.parameters.trigger == TriggerMode::Once && self.status.lock().triggered;

        let outcome = if already_triggered {
            UpdateOutcome::Skipped
        } else {
            match self.model.linearise(state, &observation) {
                Some(lin) => state.kalman_update(
                    &lin.innovation,
                    &lin.h_jac,
                    &lin.r_mat,
                    self.parameters.mahalanobis_distance_rejection_threshold,
                ),
                None => UpdateOutcome::Skipped,
            }
        };

        // The stamp and its counter land together so a report never sees one
        // without the other.
        let mut status = self.status.lock();
        status.rate.record(timestamp);
        match outcome {
            UpdateOutcome::Accepted {
                mahalanobis_distance,
            } => {
                status.accepted += 1;
                status.triggered = true;
                status.last_mahalanobis_distance = Some(mahalanobis_distance);
            }
            UpdateOutcome::Rejected {
                mahalanobis_distance,
            } => {
                status.rejected += 1;
                status.last_mahalanobis_distance = Some(mahalanobis_distance);
                debug!(
                    "{} observation at {:.3}s rejected (mahalanobis distance {:.2} > {:.2})",
                    self.parameters.name,
                    timestamp.as_secs_f64(),
                    mahalanobis_distance,
                    self.parameters.mahalanobis_distance_rejection_threshold
                );
            }
            UpdateOutcome::Skipped => status.skipped += 1,
        }
        outcome
    }

    fn heartbeat_callback(&self, now: Duration) -> bool {
        let mut status = self.status.lock();
        let alive = status.rate.is_alive(now);
        if status.alive == Some(true) && !alive {
            warn!(
                "{} updater: no {} observation on '{}' for more than {:?}",
                self.parameters.name,
                self.model.label(),
                self.parameters.topic,
                status.rate.timeout().unwrap_or_default()
            );
        }
        status.alive = Some(alive);
        status.last_heartbeat = Some(now);
        alive
    }

    fn get_report(&self) -> DiagnosticReport {
        let status = self.status.lock();
        let mut report = DiagnosticReport::default();
        let name = &self.parameters.name;

        let level = match (status.alive, status.rate.last_stamp()) {
            (_, None) if self.parameters.minimal_rate > 0 => DiagnosticStatus::Stale,
            (Some(false), _) => DiagnosticStatus::Error,
            _ => DiagnosticStatus::Ok,
        };
        let message = match level {
            DiagnosticStatus::Stale => format!("{name} updater: no data received"),
            DiagnosticStatus::Error => format!("{name} updater: not alive"),
            _ => format!("{name} updater: alive"),
        };
        report.push(level, message);

        report.set_info(format!("{name}.topic"), &self.parameters.topic);
        report.set_info(format!("{name}.rate"), format!("{:.1}", status.rate.rate()));
        report.set_info(format!("{name}.minimal_rate"), self.parameters.minimal_rate);
        report.set_info(format!("{name}.trigger"), self.parameters.trigger);
        report.set_info(format!("{name}.accepted"), status.accepted);
        report.set_info(format!("{name}.rejected"), status.rejected);
        report.set_info(format!("{name}.skipped"), status.skipped);
        if let Some(distance) = status.last_mahalanobis_distance {
            report.set_info(format!("{name}.mahalanobis_distance"), format!("{distance:.3}"));
        }
        report
    }
}

pub mod course;
pub mod pose;
pub mod range;

pub use course::CourseModel;
pub use pose::PoseModel;
pub use range::RangeModel;

pub type CourseUpdater = KalmanUpdater<CourseModel>;
pub type PoseUpdater = KalmanUpdater<PoseModel>;
pub type RangeUpdater = KalmanUpdater<RangeModel>;


#[cfg(test)]
mod tests {
    use super::test_utils::parameters;
    use super::*;
    use crate::observations::ObservationCourse;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;
    use std::sync::{mpsc, Arc};
    use std::thread;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_rejected_observation_leaves_state_untouched() {
        let mut params = parameters("course", 1, TriggerMode::Always);
        params.mahalanobis_distance_rejection_threshold = 1.0;
        let updater = CourseUpdater::new(CourseModel, params);
        let mut state = PlanarState::default();
        let before = state.clone();

        // P_yaw = 1, R = 0.01: d = (pi / 2) / sqrt(1.01) ~= 1.56 > 1.
        let outcome = updater.update(&mut state, ObservationCourse::new(PI / 2.0, 0.01), secs(1.0));

        let expected = PI / 2.0 / 1.01_f64.sqrt();
        match outcome {
            UpdateOutcome::Rejected {
                mahalanobis_distance,
            } => assert_abs_diff_eq!(mahalanobis_distance, expected, epsilon = 1e-9),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(state, before);
        let report = updater.get_report();
        assert_eq!(report.info["course.rejected"], "1");
        assert_eq!(report.info["course.accepted"], "0");
    }

    #[test]
    fn test_innovation_is_wrapped_before_gating() {
        let updater = CourseUpdater::new(CourseModel, parameters("course", 1, TriggerMode::Always));
        let mut state = PlanarState::default();

        // 3.5 rad is -2.78 rad away from yaw 0 once wrapped: d ~= 2.77 < 3.
        let outcome = updater.update(&mut state, ObservationCourse::new(3.5, 0.01), secs(1.0));

        assert!(outcome.is_accepted());
        assert!(state.yaw() < 0.0);
    }

    struct GatedCourse {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ObservationModel for GatedCourse {
        type Observation = ObservationCourse;

        fn label(&self) -> &'static str {
            "course"
        }

        fn linearise(
            &self,
            state: &PlanarState,
            observation: &ObservationCourse,
        ) -> Option<Linearisation> {
            self.entered.lock().send(()).ok()?;
            self.release.lock().recv().ok()?;
            CourseModel.linearise(state, observation)
        }
    }

    #[test]
    fn test_report_during_update_sees_stamp_and_count_together() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let model = GatedCourse {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        let updater = Arc::new(KalmanUpdater::new(
            model,
            parameters("course", 1, TriggerMode::Always),
        ));

        let worker = {
            let updater = Arc::clone(&updater);
            thread::spawn(move || {
                let mut state = PlanarState::default();
                updater.update(&mut state, ObservationCourse::new(0.1, 0.01), secs(1.0))
            })
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let report = updater.get_report();
        assert_eq!(report.status(), DiagnosticStatus::Stale);
        assert_eq!(report.info["course.accepted"], "0");
        assert_eq!(report.info["course.rate"], "0.0");

        release_tx.send(()).unwrap();
        assert!(worker.join().unwrap().is_accepted());

        let report = updater.get_report();
        assert_eq!(report.status(), DiagnosticStatus::Ok);
        assert_eq!(report.info["course.accepted"], "1");
        assert_eq!(report.info["course.rate"], "1.0");
    }

    #[test]
    fn test_trigger_once_applies_first_accepted_only() {
        let updater = CourseUpdater::new(CourseModel, parameters("course", 0, TriggerMode::Once));
        let mut state = PlanarState::default();

        let first = updater.update(&mut state, ObservationCourse::new(0.5, 0.01), secs(1.0));
        assert!(first.is_accepted());
        let yaw = state.yaw();

        let second = updater.update(&mut state, ObservationCourse::new(0.2, 0.01), secs(2.0));
        assert_eq!(second, UpdateOutcome::Skipped);
        assert_abs_diff_eq!(state.yaw(), yaw);

        let report = updater.get_report();
        assert_eq!(report.info["course.accepted"], "1");
        assert_eq!(report.info["course.skipped"], "1");
    }

    #[test]
    fn test_heartbeat_transitions() {
        let updater =
            CourseUpdater::new(CourseModel, parameters("course", 10, TriggerMode::Always));
        let mut state = PlanarState::default();

        assert!(!updater.heartbeat_callback(secs(0.5)));
        assert_eq!(updater.get_report().status(), DiagnosticStatus::Stale);

        updater.update(&mut state, ObservationCourse::new(0.0, 0.01), secs(1.0));
        assert!(updater.heartbeat_callback(secs(1.05)));
        assert_eq!(updater.get_report().status(), DiagnosticStatus::Ok);

        // Silent for longer than 1 / 10 Hz.
        assert!(!updater.heartbeat_callback(secs(1.5)));
        assert_eq!(updater.get_report().status(), DiagnosticStatus::Error);

        updater.update(&mut state, ObservationCourse::new(0.0, 0.01), secs(1.55));
        assert!(updater.heartbeat_callback(secs(1.6)));
        assert_eq!(updater.get_report().status(), DiagnosticStatus::Ok);
    }
}
