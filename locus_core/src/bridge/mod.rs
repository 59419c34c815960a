// locus_core/src/bridge/mod.rs

//! The update bridge: one per sensor source.
//!
//! A bridge owns exactly one `Updater`, shares the `Filter` with every other
//! bridge, and owns the subscription that feeds it. For each received message
//! it extracts the observation and its stamp, binds them to the updater in an
//! `UpdateOperation`, and submits that operation to the filter.
//!
//! A bridge adds no locking of its own. Messages for one bridge must be
//! delivered sequentially, which is what a `MessageDelivery` subscription
//! guarantees; the filter serialises concurrent submissions across bridges.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::conversions::{from_wire, ObservationMessage};
use crate::diagnostics::DiagnosticReport;
use crate::error::BridgeError;
use crate::estimation::filters::serialized::SerializedFilter;
use crate::estimation::state::PlanarState;
use crate::estimation::{Filter, UpdateOperation};
use crate::messages::{ObservationCourseStamped, ObservationPose2DStamped, ObservationRangeStamped};
use crate::updaters::{CourseUpdater, PoseUpdater, RangeUpdater, Updater};

pub mod builder;
pub mod factory;

// =========================================================================
// == Delivery Contract ==
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reliability {
    /// Publishers never wait; when the queue is full the oldest message is
    /// dropped.
    BestEffort,
    /// Publishers wait for room in the queue.
    Reliable,
}

/// Quality of service of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QosProfile {
    pub reliability: Reliability,
    pub depth: usize,
}

impl QosProfile {
    pub const fn best_effort(depth: usize) -> Self {
        Self {
            reliability: Reliability::BestEffort,
            depth,
        }
    }

    pub const fn reliable(depth: usize) -> Self {
        Self {
            reliability: Reliability::Reliable,
            depth,
        }
    }

    /// Only the most recent undelivered message matters.
    pub const fn sensor_data() -> Self {
        Self::best_effort(1)
    }
}

impl Default for QosProfile {
    fn default() -> Self {
        Self::sensor_data()
    }
}

/// A message-delivery facility.
///
/// Every subscription gets its own execution context: callbacks of one
/// subscription never run concurrently with each other, while callbacks of
/// different subscriptions may. Dropping the returned subscription stops
/// delivery.
pub trait MessageDelivery {
    type Subscription: Send + Sync + 'static;

    fn subscribe<M, C>(
        &self,
        channel: &str,
        qos: QosProfile,
        callback: C,
    ) -> Result<Self::Subscription, BridgeError>
    where
        M: Send + Sync + 'static,
        C: Fn(Arc<M>) + Send + 'static;
}

// =========================================================================
// == Health Interface ==
// =========================================================================

/// The type-erased view of a bridge used by the health aggregator.
pub trait UpdaterInterface: Send + Sync {
    fn channel(&self) -> &str;

    /// Delegates to the updater's liveness check at time `now`.
    fn heartbeat_callback(&self, now: Duration) -> bool;

    /// Delegates to the updater's diagnostic report.
    fn get_report(&self) -> DiagnosticReport;
}

// =========================================================================
// == Update Bridge ==
// =========================================================================

/// The wired part of a bridge, shared with the delivery callback.
struct BridgeCore<F, U, M> {
    channel: String,
    filter: Arc<F>,
    updater: U,
    _message: PhantomData<fn(&M)>,
}

impl<F, U, M> BridgeCore<F, U, M>
where
    F: Filter<State = U::State>,
    U: Updater,
    M: ObservationMessage<Observation = U::Observation>,
{
    fn process_message(&self, msg: &M) {
        let (observation, timestamp) = from_wire(msg);

        let updater = &self.updater;
        let channel = self.channel.as_str();
        let operation = UpdateOperation::new(move |state: &mut U::State, timestamp: Duration| {
            let outcome = updater.update(state, observation, timestamp);
            trace!(
                "'{}' update at {:.3}s: {:?}",
                channel,
                timestamp.as_secs_f64(),
                outcome
            );
            outcome
        });

        self.filter.process(timestamp, operation);
    }
}

/// A fully wired bridge between one message channel and the shared filter.
///
/// Only `BridgeBuilder` (and the factory built on it) can create one, so a
/// bridge never processes a message before its updater and filter are set.
pub struct UpdateBridge<F, U, M> {
    core: Arc<BridgeCore<F, U, M>>,
    subscription: Option<Box<dyn Any + Send + Sync>>,
}

impl<F, U, M> UpdateBridge<F, U, M>
where
    F: Filter<State = U::State>,
    U: Updater,
    M: ObservationMessage<Observation = U::Observation>,
{
    pub(crate) fn new(channel: String, filter: Arc<F>, updater: U) -> Self {
        Self {
            core: Arc::new(BridgeCore {
                channel,
                filter,
                updater,
                _message: PhantomData,
            }),
            subscription: None,
        }
    }

    /// Registers the message callback with `delivery`. Replaces any previous
    /// subscription.
    pub(crate) fn bind<D: MessageDelivery>(
        &mut self,
        delivery: &D,
        qos: QosProfile,
    ) -> Result<(), BridgeError>
    where
        F: 'static,
        U: 'static,
    {
        let core = Arc::clone(&self.core);
        let subscription = delivery.subscribe::<M, _>(&self.core.channel, qos, move |msg| {
            core.process_message(&msg)
        })?;
        self.subscription = Some(Box::new(subscription));
        Ok(())
    }

    /// Converts `msg`, binds its observation to the updater and submits the
    /// resulting operation to the filter. Blocks for as long as the filter
    /// takes to apply it.
    pub fn process_message(&self, msg: &M) {
        self.core.process_message(msg)
    }

    pub fn channel(&self) -> &str {
        &self.core.channel
    }

    pub fn updater(&self) -> &U {
        &self.core.updater
    }

    pub fn filter(&self) -> &Arc<F> {
        &self.core.filter
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }
}

impl<F, U, M> UpdaterInterface for UpdateBridge<F, U, M>
where
    F: Filter<State = U::State>,
    U: Updater,
    M: ObservationMessage<Observation = U::Observation>,
{
    fn channel(&self) -> &str {
        &self.core.channel
    }

    fn heartbeat_callback(&self, now: Duration) -> bool {
        self.core.updater.heartbeat_callback(now)
    }

    fn get_report(&self) -> DiagnosticReport {
        self.core.updater.get_report()
    }
}

impl<F, U, M> fmt::Debug for UpdateBridge<F, U, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateBridge")
            .field("channel", &self.core.channel)
            .field("subscribed", &self.subscription.is_some())
            .finish()
    }
}

// --- Bridges over the reference planar filter ---
pub type PlanarFilter = SerializedFilter<PlanarState>;
pub type CourseBridge = UpdateBridge<PlanarFilter, CourseUpdater, ObservationCourseStamped>;
pub type PoseBridge = UpdateBridge<PlanarFilter, PoseUpdater, ObservationPose2DStamped>;
pub type RangeBridge = UpdateBridge<PlanarFilter, RangeUpdater, ObservationRangeStamped>;


#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use crate::conversions::ToWire;
    use crate::estimation::BeliefState;
    use crate::estimation::UpdateOutcome;
    use crate::observations::ObservationCourse;
    use crate::params::{FilterParameters, PredictorParameters};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::thread;

    type TraceFilter = SerializedFilter<Trace>;
    type TraceBridge = UpdateBridge<TraceFilter, TraceUpdater, ObservationCourseStamped>;
    type TraceBuilder = builder::BridgeBuilder<TraceFilter, TraceUpdater, ObservationCourseStamped>;

    fn trace_filter() -> Arc<TraceFilter> {
        Arc::new(SerializedFilter::new(
            Trace::default(),
            FilterParameters::default(),
            PredictorParameters::default(),
        ))
    }

    fn course_msg(angle: f64, millis: u64) -> ObservationCourseStamped {
        ObservationCourse::new(angle, 0.01).to_wire(Duration::from_millis(millis), "base_link")
    }

    fn trace_bridge(
        source: &str,
        filter: &Arc<TraceFilter>,
        busy: &Arc<AtomicBool>,
    ) -> TraceBridge {
        builder::BridgeBuilder::new(source)
            .load_updater(TraceUpdater::new(source, Arc::clone(busy)))
            .register_filter(Arc::clone(filter))
            .build()
            .unwrap()
    }

    #[test]
    fn test_sequential_deliveries_are_processed_in_order() {
        let filter = trace_filter();
        let busy = Arc::new(AtomicBool::new(false));
        let bridge = trace_bridge("course", &filter, &busy);

        for i in 0..25 {
            bridge.process_message(&course_msg(i as f64, i * 10));
        }

        let history = filter.history();
        assert_eq!(history.len(), 25);
        let stamps: Vec<_> = history.iter().map(|u| u.timestamp.as_millis() as u64).collect();
        assert_eq!(stamps, (0..25).map(|i| i * 10).collect::<Vec<_>>());

        let angles: Vec<_> = filter.snapshot().applied.iter().map(|(_, a)| *a).collect();
        assert_eq!(angles, (0..25).map(|i| i as f64).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_bridges_are_serialised_by_the_filter() {
        let filter = trace_filter();
        let busy = Arc::new(AtomicBool::new(false));
        let bridges = [
            Arc::new(trace_bridge("a", &filter, &busy)),
            Arc::new(trace_bridge("b", &filter, &busy)),
        ];

        let workers: Vec<_> = bridges
            .iter()
            .map(|bridge| {
                let bridge = Arc::clone(bridge);
                thread::spawn(move || {
                    for i in 0..100 {
                        bridge.process_message(&course_msg(i as f64, 1000));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let applied = filter.snapshot().applied;
        assert_eq!(applied.len(), 200);
        for source in ["a", "b"] {
            let angles: Vec<_> = applied
                .iter()
                .filter(|(s, _)| s == source)
                .map(|(_, a)| *a)
                .collect();
            assert_eq!(angles, (0..100).map(|i| i as f64).collect::<Vec<_>>());
        }
    }

    /// Blocks inside `update` until the test releases it.
    struct GateUpdater {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
        reports: std::sync::atomic::AtomicU64,
    }

    impl Updater for GateUpdater {
        type Observation = ObservationCourse;
        type State = Trace;

        fn update(
            &self,
            state: &mut Trace,
            observation: ObservationCourse,
            _: Duration,
        ) -> UpdateOutcome {
            self.entered.lock().send(()).unwrap();
            self.release.lock().recv().unwrap();
            state.applied.push(("gate".to_string(), observation.y()));
            UpdateOutcome::Skipped
        }

        fn heartbeat_callback(&self, _now: Duration) -> bool {
            true
        }

        fn get_report(&self) -> DiagnosticReport {
            self.reports.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            DiagnosticReport::default()
        }
    }

    type GateBridge = UpdateBridge<TraceFilter, GateUpdater, ObservationCourseStamped>;

    #[test]
    fn test_report_and_heartbeat_do_not_wait_for_inflight_update() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let filter = trace_filter();
        let bridge: GateBridge = builder::BridgeBuilder::new("gate")
            .load_updater(GateUpdater {
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
                reports: Default::default(),
            })
            .register_filter(Arc::clone(&filter))
            .build()
            .unwrap();
        let bridge = Arc::new(bridge);

        let worker = {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || bridge.process_message(&course_msg(1.0, 5)))
        };
        entered_rx.recv().unwrap();

        // The update is now in flight and holds the filter.
        let (done_tx, done_rx) = mpsc::channel();
        {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                let alive = bridge.heartbeat_callback(Duration::from_millis(6));
                let report = bridge.get_report();
                done_tx.send((alive, report)).unwrap();
            });
        }
        let (alive, report) = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("report blocked on the in-flight update");
        assert!(alive);
        assert_eq!(report, DiagnosticReport::default());

        release_tx.send(()).unwrap();
        worker.join().unwrap();
        assert_eq!(filter.snapshot().applied.len(), 1);
    }

    #[test]
    fn test_builder_requires_updater_and_filter() {
        let filter = trace_filter();
        let busy = Arc::new(AtomicBool::new(false));

        let missing_updater = TraceBuilder::new("x")
            .register_filter(Arc::clone(&filter))
            .build();
        assert_eq!(
            missing_updater.unwrap_err(),
            BridgeError::MissingUpdater {
                channel: "x".to_string()
            }
        );

        let missing_filter = TraceBuilder::new("x")
            .load_updater(TraceUpdater::new("x", busy))
            .build();
        assert_eq!(
            missing_filter.unwrap_err(),
            BridgeError::MissingFilter {
                channel: "x".to_string()
            }
        );
    }

    #[test]
    fn test_subscribed_bridge_receives_deliveries() {
        let delivery = ManualDelivery::default();
        let filter = trace_filter();
        let busy = Arc::new(AtomicBool::new(false));

        let bridge: TraceBridge = builder::BridgeBuilder::new("course")
            .load_updater(TraceUpdater::new("course", busy))
            .register_filter(Arc::clone(&filter))
            .subscribe(&delivery, QosProfile::sensor_data())
            .unwrap();
        assert!(bridge.is_subscribed());
        assert_eq!(delivery.channels(), vec!["course".to_string()]);

        delivery.deliver("course", course_msg(0.25, 1));
        // Wrong type on the channel is ignored by the callback.
        delivery.deliver("course", 42_u32);

        assert_eq!(filter.snapshot().applied, vec![("course".to_string(), 0.25)]);
        assert!(bridge.heartbeat_callback(Duration::from_millis(2)));
        assert_eq!(bridge.get_report().info["received"], "1");
    }

    #[test]
    fn test_trace_state_has_no_prediction() {
        let mut trace = Trace::default();
        trace.predict(Duration::from_secs(1));
        assert!(trace.applied.is_empty());
    }
}
