use crate::{InvalidationHandler, InvalidationSignal};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::{fmt, sync::Arc};
use uuid::Uuid;

#[cfg(feature = "future")]
use event_listener::Event;

/// Identifies a process (or any other unit) sharing a logical cache with its
/// peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Creates a random (UUID version 4) node ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An invalidation signal together with the node that published it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope<K> {
    pub origin: NodeId,
    pub signal: InvalidationSignal<K>,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// Every handle to the bus has been dropped and no signals are pending.
    #[error("the invalidation bus has been closed")]
    Closed,
}

struct BusInner<K> {
    subscribers: Mutex<Vec<Sender<Envelope<K>>>>,
    #[cfg(feature = "future")]
    event: Arc<Event>,
}

impl<K> Drop for BusInner<K> {
    fn drop(&mut self) {
        // Drop the senders first, so that woken up subscribers observe the
        // disconnection.
        self.subscribers.get_mut().clear();
        #[cfg(feature = "future")]
        self.event.notify(usize::MAX);
    }
}

/// An in-process fan-out of [`InvalidationSignal`][signal]s.
///
/// The bus plays the role of a distributed event bus: every subscriber receives
/// every signal published after it subscribed, except for those published by
/// its own node, since the publisher is expected to have invalidated its local
/// cache already.
///
/// Cloning the bus is cheap; all clones share the same subscribers. Once the
/// last clone is dropped, subscribers drain what is left and then stop.
///
/// # Examples
///
/// ```rust
/// use flightcache::{
///     notification::{InvalidationBus, NodeId},
///     sync::Cache,
///     InvalidationSignal,
/// };
///
/// let bus = InvalidationBus::new();
/// let (node_a, node_b) = (NodeId::new(), NodeId::new());
///
/// let cache_b: Cache<String, u32> = Cache::new();
/// let subscriber_b = bus.subscribe(node_b);
///
/// cache_b.get_with("answer".to_string(), || 42);
///
/// // Node A changed the underlying data and tells everybody else.
/// bus.publish(node_a, InvalidationSignal::Key("answer".to_string()));
///
/// assert_eq!(subscriber_b.apply_pending(&cache_b), Ok(1));
/// assert!(cache_b.get(&"answer".to_string()).is_none());
/// ```
///
/// [signal]: ../enum.InvalidationSignal.html
pub struct InvalidationBus<K> {
    inner: Arc<BusInner<K>>,
}

impl<K> Clone for InvalidationBus<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Default for InvalidationBus<K>
where
    K: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> InvalidationBus<K>
where
    K: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                #[cfg(feature = "future")]
                event: Arc::new(Event::new()),
            }),
        }
    }

    /// Subscribes `node` to signals published from now on.
    pub fn subscribe(&self, node: NodeId) -> Subscriber<K> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.inner.subscribers.lock().push(tx);
        Subscriber {
            node,
            receiver: rx,
            #[cfg(feature = "future")]
            event: Arc::clone(&self.inner.event),
        }
    }

    /// Sends the signal to every live subscriber, and returns how many
    /// subscribers it was sent to. Subscribers that have been dropped are
    /// forgotten.
    pub fn publish(&self, origin: NodeId, signal: InvalidationSignal<K>) -> usize {
        let envelope = Envelope { origin, signal };
        let delivered = {
            let mut subscribers = self.inner.subscribers.lock();
            subscribers.retain(|tx| tx.send(envelope.clone()).is_ok());
            subscribers.len()
        };

        #[cfg(feature = "logging")]
        log::trace!("Published an invalidation from node {origin} to {delivered} subscriber(s)");

        #[cfg(feature = "future")]
        self.inner.event.notify(usize::MAX);

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

/// The receiving end of an [`InvalidationBus`][bus] for one node.
///
/// [bus]: ./struct.InvalidationBus.html
pub struct Subscriber<K> {
    node: NodeId,
    receiver: Receiver<Envelope<K>>,
    #[cfg(feature = "future")]
    event: Arc<Event>,
}

impl<K> Subscriber<K> {
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Applies every pending signal to the handler without blocking, and returns
    /// how many were applied. Signals published by this subscriber's own node
    /// are skipped and not counted.
    ///
    /// Returns `Err(BusError::Closed)` when nothing was pending and the bus has
    /// been dropped.
    pub fn apply_pending<H>(&self, handler: &H) -> Result<usize, BusError>
    where
        H: InvalidationHandler<K> + ?Sized,
    {
        let mut applied = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) => {
                    if self.deliver(envelope, handler) {
                        applied += 1;
                    }
                }
                Err(TryRecvError::Empty) => return Ok(applied),
                Err(TryRecvError::Disconnected) if applied > 0 => return Ok(applied),
                Err(TryRecvError::Disconnected) => return Err(BusError::Closed),
            }
        }
    }

    /// Blocks the current thread, applying signals as they arrive, until the bus
    /// is dropped.
    pub fn run<H>(&self, handler: &H)
    where
        H: InvalidationHandler<K> + ?Sized,
    {
        while let Ok(envelope) = self.receiver.recv() {
            self.deliver(envelope, handler);
        }
    }

    /// Applies signals as they arrive, until the bus is dropped.
    #[cfg(feature = "future")]
    #[cfg_attr(docsrs, doc(cfg(feature = "future")))]
    pub async fn run_async<H>(&self, handler: &H)
    where
        H: InvalidationHandler<K> + ?Sized,
    {
        loop {
            // Start listening before draining, so that a signal published in
            // between will wake us up.
            let listener = self.event.listen();
            if self.apply_pending(handler).is_err() {
                return;
            }
            listener.await;
        }
    }

    fn deliver<H>(&self, envelope: Envelope<K>, handler: &H) -> bool
    where
        H: InvalidationHandler<K> + ?Sized,
    {
        if envelope.origin == self.node {
            return false;
        }
        handler.on_invalidation(envelope.signal);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{BusError, InvalidationBus, NodeId};
    use crate::{InvalidationHandler, InvalidationSignal};

    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<InvalidationSignal<&'static str>>>);

    impl InvalidationHandler<&'static str> for Recorder {
        fn on_invalidation(&self, signal: InvalidationSignal<&'static str>) {
            self.0.lock().push(signal);
        }
    }

    #[test]
    fn fans_out_and_skips_own_origin() {
        let bus = InvalidationBus::new();
        let (a, b) = (NodeId::new(), NodeId::new());
        let sub_a = bus.subscribe(a);
        let sub_b = bus.subscribe(b);

        assert_eq!(bus.publish(a, InvalidationSignal::Key("x")), 2);
        assert_eq!(bus.publish(b, InvalidationSignal::All), 2);

        let (rec_a, rec_b) = (Recorder::default(), Recorder::default());
        assert_eq!(sub_a.apply_pending(&rec_a), Ok(1));
        assert_eq!(sub_b.apply_pending(&rec_b), Ok(1));
        assert_eq!(*rec_a.0.lock(), vec![InvalidationSignal::All]);
        assert_eq!(*rec_b.0.lock(), vec![InvalidationSignal::Key("x")]);

        // Nothing pending anymore.
        assert_eq!(sub_a.apply_pending(&rec_a), Ok(0));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = InvalidationBus::<&'static str>::new();
        let sub = bus.subscribe(NodeId::new());
        drop(bus.subscribe(NodeId::new()));
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.publish(NodeId::new(), InvalidationSignal::All), 1);
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
    }

    #[test]
    fn closed_after_bus_is_dropped() {
        let bus = InvalidationBus::new();
        let sub = bus.subscribe(NodeId::new());
        bus.publish(NodeId::new(), InvalidationSignal::Key("x"));
        drop(bus);

        let rec = Recorder::default();
        // Pending signals are still delivered.
        assert_eq!(sub.apply_pending(&rec), Ok(1));
        assert_eq!(sub.apply_pending(&rec), Err(BusError::Closed));
        // And `run` returns immediately.
        sub.run(&rec);
        assert_eq!(rec.0.lock().len(), 1);
    }

    #[test]
    fn run_on_a_thread() {
        let bus = InvalidationBus::new();
        let sub = bus.subscribe(NodeId::new());
        let origin = NodeId::new();

        let handle = std::thread::spawn(move || {
            let rec = Recorder::default();
            sub.run(&rec);
            rec.0.into_inner()
        });

        bus.publish(origin, InvalidationSignal::Key("a"));
        bus.publish(origin, InvalidationSignal::Key("b"));
        drop(bus);

        let received = handle.join().unwrap();
        assert_eq!(
            received,
            vec![InvalidationSignal::Key("a"), InvalidationSignal::Key("b")]
        );
    }
}
