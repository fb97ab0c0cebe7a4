//! Invalidation listeners and the invalidation transport.

use std::sync::Arc;

mod bus;
pub(crate) mod notifier;

pub use bus::{BusError, Envelope, InvalidationBus, NodeId, Subscriber};

/// A listener called for every entry removed by an invalidation.
pub type InvalidationListener<K, V> =
    Arc<dyn Fn(Arc<K>, V, RemovalCause) + Send + Sync + 'static>;

/// Indicates why a cached entry was removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalCause {
    /// The entry was removed by a direct call to `invalidate` or
    /// `invalidate_all`.
    Explicit,
    /// The entry was removed by an [`InvalidationSignal`][signal] delivered
    /// through [`InvalidationHandler`][handler], for example by a remote
    /// transport or a committed unit of work.
    ///
    /// [signal]: ../enum.InvalidationSignal.html
    /// [handler]: ../trait.InvalidationHandler.html
    Signaled,
}

impl RemovalCause {
    pub fn was_signaled(&self) -> bool {
        matches!(self, Self::Signaled)
    }
}
