// locus_core/src/bridge/factory.rs

use std::sync::Arc;

use crate::bridge::builder::BridgeBuilder;
use crate::bridge::{MessageDelivery, QosProfile, UpdateBridge};
use crate::conversions::ObservationMessage;
use crate::error::BridgeError;
use crate::estimation::Filter;
use crate::updaters::Updater;

/// Builds a bridge for `channel` with sensor-data QoS (best effort, depth 1).
///
/// The message type is usually fixed by the binding's type, e.g.
/// `let course: CourseBridge = make_update_bridge(&bus, "course", filter, updater)?;`
pub fn make_update_bridge<F, U, M, D>(
    delivery: &D,
    channel: &str,
    filter: Arc<F>,
    updater: U,
) -> Result<UpdateBridge<F, U, M>, BridgeError>
where
    F: Filter<State = U::State> + 'static,
    U: Updater + 'static,
    M: ObservationMessage<Observation = U::Observation>,
    D: MessageDelivery,
{
    make_update_bridge_with_qos(delivery, channel, filter, updater, QosProfile::sensor_data())
}

pub fn make_update_bridge_with_qos<F, U, M, D>(
    delivery: &D,
    channel: &str,
    filter: Arc<F>,
    updater: U,
    qos: QosProfile,
) -> Result<UpdateBridge<F, U, M>, BridgeError>
where
    F: Filter<State = U::State> + 'static,
    U: Updater + 'static,
    M: ObservationMessage<Observation = U::Observation>,
    D: MessageDelivery,
{
    BridgeBuilder::new(channel)
        .load_updater(updater)
        .register_filter(filter)
        .subscribe(delivery, qos)
}
