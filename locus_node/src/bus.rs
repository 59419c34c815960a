// locus_node/src/bus.rs

//! An in-process message bus.
//!
//! Topics are named and typed. Every subscription owns a bounded queue and a
//! dedicated worker thread that drains it, so the callbacks of one
//! subscription run strictly one after another while different subscriptions
//! run in parallel.

use std::any::type_name;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use downcast_rs::{impl_downcast, Downcast};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, warn};

use locus_core::bridge::{MessageDelivery, QosProfile, Reliability};
use locus_core::error::BridgeError;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Topic '{channel}' carries {found}, not {expected}")]
    TypeMismatch {
        channel: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Failed to spawn the subscriber thread for '{channel}': {source}")]
    Spawn {
        channel: String,
        #[source]
        source: std::io::Error,
    },
}

// --- Trait for Type-Erased Topics ---

/// Lets topics of different message types live in one map.
pub trait AnyTopic: Downcast + Send + Sync {
    fn unsubscribe(&mut self, id: u64) -> bool;
    fn subscriber_count(&self) -> usize;
}
impl_downcast!(AnyTopic);

/// Only every `DROP_WARN_INTERVAL`th eviction, and the first, is a warning.
const DROP_WARN_INTERVAL: u64 = 100;

fn is_reported_drop(dropped: u64) -> bool {
    dropped == 1 || dropped % DROP_WARN_INTERVAL == 0
}

/// The publisher's end of one subscription.
struct Slot<T> {
    id: u64,
    channel: Arc<str>,
    qos: QosProfile,
    sender: Sender<Arc<T>>,
    // Lets the publisher evict the oldest message under best effort.
    evict: Receiver<Arc<T>>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            channel: Arc::clone(&self.channel),
            qos: self.qos,
            sender: self.sender.clone(),
            evict: self.evict.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> Slot<T> {
    fn report_drop(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if is_reported_drop(dropped) {
            warn!(
                "Subscriber {} on '{}' is too slow: dropped a stale message ({} so far)",
                self.id, self.channel, dropped
            );
        } else {
            debug!("Subscriber {} on '{}' dropped a stale message", self.id, self.channel);
        }
    }

    fn deliver(&self, message: Arc<T>) {
        match self.qos.reliability {
            // A disconnected queue means the subscription is going away.
            Reliability::Reliable => {
                let _ = self.sender.send(message);
            }
            Reliability::BestEffort => {
                let mut message = message;
                loop {
                    match self.sender.try_send(message) {
                        Ok(()) | Err(TrySendError::Disconnected(_)) => break,
                        Err(TrySendError::Full(rejected)) => {
                            if self.evict.try_recv().is_ok() {
                                self.report_drop();
                            }
                            message = rejected;
                        }
                    }
                }
            }
        }
    }
}

/// A single typed topic and its subscribers.
pub struct Topic<T> {
    slots: Vec<Slot<T>>,
    published: u64,
}

impl<T> Default for Topic<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            published: 0,
        }
    }
}

impl<T: Send + Sync + 'static> AnyTopic for Topic<T> {
    fn unsubscribe(&mut self, id: u64) -> bool {
        let before = self.slots.len();
        self.slots.retain(|slot| slot.id != id);
        self.slots.len() != before
    }

    fn subscriber_count(&self) -> usize {
        self.slots.len()
    }
}

struct TopicInfo {
    topic: Box<dyn AnyTopic>,
    type_name: &'static str,
}

#[derive(Default)]
struct BusInner {
    topics: Mutex<HashMap<String, TopicInfo>>,
    next_id: AtomicU64,
}

impl BusInner {
    /// Runs `f` on the topic named `channel`, creating it if needed.
    fn with_topic<T, R>(
        &self,
        channel: &str,
        f: impl FnOnce(&mut Topic<T>) -> R,
    ) -> Result<R, BusError>
    where
        T: Send + Sync + 'static,
    {
        let mut topics = self.topics.lock();
        let info = topics.entry(channel.to_string()).or_insert_with(|| TopicInfo {
            topic: Box::new(Topic::<T>::default()),
            type_name: type_name::<T>(),
        });
        let found = info.type_name;
        match info.topic.downcast_mut::<Topic<T>>() {
            Some(topic) => Ok(f(topic)),
            None => Err(BusError::TypeMismatch {
                channel: channel.to_string(),
                expected: type_name::<T>(),
                found,
            }),
        }
    }
}

// --- The Main MessageBus ---

/// A cheaply cloneable handle to the bus.
#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `message` to every current subscriber of `channel` and
    /// returns how many there were.
    ///
    /// Under best effort the call never waits; under reliable QoS it waits for
    /// room in each subscriber's queue.
    pub fn publish<T>(&self, channel: &str, message: T) -> Result<usize, BusError>
    where
        T: Send + Sync + 'static,
    {
        // Senders are cloned out so that no lock is held while delivering.
        let slots = self.inner.with_topic::<T, _>(channel, |topic| {
            topic.published += 1;
            topic.slots.clone()
        })?;

        let message = Arc::new(message);
        for slot in &slots {
            slot.deliver(Arc::clone(&message));
        }
        Ok(slots.len())
    }

    /// Registers `callback` on `channel`. It runs on a thread of its own until
    /// the returned `Subscription` is dropped.
    pub fn add_subscription<T, C>(
        &self,
        channel: &str,
        qos: QosProfile,
        callback: C,
    ) -> Result<Subscription, BusError>
    where
        T: Send + Sync + 'static,
        C: Fn(Arc<T>) + Send + 'static,
    {
        let (sender, receiver) = bounded::<Arc<T>>(qos.depth.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let worker_receiver = receiver.clone();
        let handle = thread::Builder::new()
            .name(format!("sub:{channel}"))
            .spawn(move || {
                // Ends once the slot (and any in-flight publisher copy) is gone.
                for message in worker_receiver.iter() {
                    callback(message);
                }
            })
            .map_err(|source| BusError::Spawn {
                channel: channel.to_string(),
                source,
            })?;

        let slot = Slot {
            id,
            channel: Arc::from(channel),
            qos,
            sender,
            evict: receiver,
            dropped: Arc::clone(&dropped),
        };
        if let Err(e) = self.inner.with_topic::<T, _>(channel, |topic| topic.slots.push(slot)) {
            // The slot was dropped with the closure, so the worker exits.
            let _ = handle.join();
            return Err(e);
        }

        debug!("Subscribed to '{}' ({:?}, depth {})", channel, qos.reliability, qos.depth.max(1));
        Ok(Subscription {
            bus: Arc::downgrade(&self.inner),
            channel: channel.to_string(),
            id,
            dropped,
            handle: Some(handle),
        })
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(channel)
            .map_or(0, |info| info.topic.subscriber_count())
    }

    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.topics.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl MessageDelivery for MessageBus {
    type Subscription = Subscription;

    fn subscribe<M, C>(
        &self,
        channel: &str,
        qos: QosProfile,
        callback: C,
    ) -> Result<Subscription, BridgeError>
    where
        M: Send + Sync + 'static,
        C: Fn(Arc<M>) + Send + 'static,
    {
        self.add_subscription::<M, C>(channel, qos, callback)
            .map_err(|e| BridgeError::Subscription {
                channel: channel.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Keeps a callback registered. Dropping it removes the subscriber and waits
/// for its worker to drain the queue.
pub struct Subscription {
    bus: Weak<BusInner>,
    channel: String,
    id: u64,
    dropped: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Messages evicted from this subscriber's queue before delivery.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            if let Some(info) = inner.topics.lock().get_mut(&self.channel) {
                info.topic.unsubscribe(self.id);
            }
        }

        let Some(handle) = self.handle.take() else {
            return;
        };
        // A callback may drop its own subscription.
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("Subscriber thread for '{}' panicked", self.channel);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_best_effort_depth_one_keeps_latest() {
        let bus = MessageBus::new();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (seen_tx, seen_rx) = mpsc::channel();
        let release_rx = Mutex::new(release_rx);

        let subscription = bus
            .add_subscription::<u32, _>("counter", QosProfile::sensor_data(), move |msg| {
                if *msg == 1 {
                    entered_tx.send(()).unwrap();
                    release_rx.lock().recv().unwrap();
                }
                seen_tx.send(*msg).unwrap();
            })
            .unwrap();

        bus.publish("counter", 1_u32).unwrap();
        entered_rx.recv_timeout(TIMEOUT).unwrap();

        // The worker is busy with 1; only the newest of these survives.
        for i in 2..=4_u32 {
            assert_eq!(bus.publish("counter", i).unwrap(), 1);
        }
        release_tx.send(()).unwrap();

        assert_eq!(seen_rx.recv_timeout(TIMEOUT).unwrap(), 1);
        assert_eq!(seen_rx.recv_timeout(TIMEOUT).unwrap(), 4);
        assert_eq!(subscription.dropped(), 2);

        drop(subscription);
        assert!(seen_rx.try_recv().is_err());
    }

    #[test]
    fn test_drop_warnings_are_rate_limited() {
        let reported: Vec<u64> = (1..=250).filter(|&n| is_reported_drop(n)).collect();
        assert_eq!(reported, vec![1, 100, 200]);
    }

    #[test]
    fn test_subscription_callbacks_run_sequentially_in_order() {
        let bus = MessageBus::new();
        let busy = Arc::new(AtomicBool::new(false));
        let (seen_tx, seen_rx) = mpsc::channel();

        let _subscription = {
            let busy = Arc::clone(&busy);
            bus.add_subscription::<u32, _>("seq", QosProfile::reliable(8), move |msg| {
                assert!(!busy.swap(true, Ordering::SeqCst), "overlapping callbacks");
                thread::yield_now();
                busy.store(false, Ordering::SeqCst);
                seen_tx.send(*msg).unwrap();
            })
            .unwrap()
        };

        for i in 0..100_u32 {
            bus.publish("seq", i).unwrap();
        }
        let seen: Vec<u32> = (0..100)
            .map(|_| seen_rx.recv_timeout(TIMEOUT).unwrap())
            .collect();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_topic_type_is_fixed_by_first_use() {
        let bus = MessageBus::new();
        bus.publish("pose", 1.0_f64).unwrap();

        let err = bus.publish("pose", 1_u32).unwrap_err();
        assert!(matches!(err, BusError::TypeMismatch { .. }));

        let err = bus
            .add_subscription::<String, _>("pose", QosProfile::sensor_data(), |_| {})
            .unwrap_err();
        assert!(err.to_string().contains("'pose'"));
        assert_eq!(bus.subscriber_count("pose"), 0);
    }

    #[test]
    fn test_dropping_subscription_unregisters() {
        let bus = MessageBus::new();
        let first = bus
            .add_subscription::<u8, _>("range", QosProfile::sensor_data(), |_| {})
            .unwrap();
        let second = bus
            .add_subscription::<u8, _>("range", QosProfile::sensor_data(), |_| {})
            .unwrap();
        assert_eq!(bus.subscriber_count("range"), 2);

        drop(first);
        assert_eq!(bus.subscriber_count("range"), 1);
        assert_eq!(bus.publish("range", 7_u8).unwrap(), 1);

        drop(second);
        assert_eq!(bus.publish("range", 7_u8).unwrap(), 0);
        assert_eq!(bus.topic_names(), vec!["range".to_string()]);
    }

    #[test]
    fn test_delivery_failure_maps_to_bridge_error() {
        let bus = MessageBus::new();
        bus.publish("course", 0_i64).unwrap();

        let result = MessageDelivery::subscribe::<f32, _>(
            &bus,
            "course",
            QosProfile::sensor_data(),
            |_: Arc<f32>| {},
        );
        assert!(matches!(result, Err(BridgeError::Subscription { .. })));
    }
}
