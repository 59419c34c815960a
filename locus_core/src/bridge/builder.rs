// locus_core/src/bridge/builder.rs

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::bridge::{MessageDelivery, QosProfile, UpdateBridge};
use crate::conversions::ObservationMessage;
use crate::error::BridgeError;
use crate::estimation::Filter;
use crate::updaters::Updater;

/// Collects the parts of an `UpdateBridge` before it can receive anything.
///
/// The updater and the filter may be given in either order. Loading a second
/// updater (or registering a second filter) replaces the first. The message
/// callback is only registered by `subscribe`, once both parts are present,
/// so no message can reach a half-wired bridge.
pub struct BridgeBuilder<F, U, M> {
    channel: String,
    updater: Option<U>,
    filter: Option<Arc<F>>,
    _message: PhantomData<fn(&M)>,
}

impl<F, U, M> BridgeBuilder<F, U, M>
where
    F: Filter<State = U::State>,
    U: Updater,
    M: ObservationMessage<Observation = U::Observation>,
{
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            updater: None,
            filter: None,
            _message: PhantomData,
        }
    }

    /// Takes ownership of the updater.
    pub fn load_updater(mut self, updater: U) -> Self {
        self.updater = Some(updater);
        self
    }

    /// Stores a shared reference to the filter.
    pub fn register_filter(mut self, filter: Arc<F>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Produces a bridge with no subscription. Messages can still be pushed
    /// through `UpdateBridge::process_message`.
    pub fn build(self) -> Result<UpdateBridge<F, U, M>, BridgeError> {
        let updater = self.updater.ok_or_else(|| BridgeError::MissingUpdater {
            channel: self.channel.clone(),
        })?;
        let filter = self.filter.ok_or_else(|| BridgeError::MissingFilter {
            channel: self.channel.clone(),
        })?;
        Ok(UpdateBridge::new(self.channel, filter, updater))
    }

    /// Builds the bridge, then subscribes it to its channel on `delivery`.
    pub fn subscribe<D: MessageDelivery>(
        self,
        delivery: &D,
        qos: QosProfile,
    ) -> Result<UpdateBridge<F, U, M>, BridgeError>
    where
        F: 'static,
        U: 'static,
    {
        let mut bridge = self.build()?;
        bridge.bind(delivery, qos)?;
        debug!("Bridge subscribed to '{}' with {:?}", bridge.channel(), qos);
        Ok(bridge)
    }
}
