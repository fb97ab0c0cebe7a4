#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Flightcache provides lazily populated caches whose values are computed at most
//! once per key at a time, and which can be invalidated locally or by signals
//! coming from other processes.
//!
//! A typical use is holding a value that is expensive to derive from some
//! external store (settings, languages, rendered pages) and that must be thrown
//! away as soon as the store changes:
//!
//! - Concurrent callers for a missing key are collapsed into a single
//!   computation. Everybody who was waiting receives the same value, or the same
//!   error.
//! - Failures are never cached. The next caller computes again.
//! - A computation that was already in flight when its key got invalidated still
//!   hands its result to the callers waiting for it, but the result is not
//!   retained, and callers arriving after the invalidation compute anew.
//!   Invalidating one key never affects the computation of another.
//!
//! # Cache implementations
//!
//! - Blocking caches in the [`sync`][sync-mod] module: `Cache` and `LoadingCache`.
//!   To use it, enable the crate feature called "sync".
//! - Asynchronous (futures aware) caches in the [`future`][future-mod] module:
//!   `Cache`, `LoadingCache` and the single value `Slot`. To use it, enable the
//!   crate feature called "future".
//!
//! Both are enabled by default.
//!
//! # Invalidation
//!
//! Every cache implements [`InvalidationHandler`], the inbound side of a
//! distributed event bus. [`notification::InvalidationBus`] is an in-process
//! fan-out that can stand in for such a bus, and [`deferred::PendingInvalidations`]
//! holds invalidations back until a unit of work commits.
//!
//! # Logging
//!
//! Enable the crate feature called "logging" to have the caches emit records
//! through the [`log`](https://docs.rs/log) facade.
//!
//! [sync-mod]: ./sync/index.html
//! [future-mod]: ./future/index.html

pub(crate) mod common;

pub mod deferred;
pub mod notification;
pub mod stats;

#[cfg(feature = "future")]
#[cfg_attr(docsrs, doc(cfg(feature = "future")))]
pub mod future;

#[cfg(feature = "future")]
#[cfg_attr(docsrs, doc(cfg(feature = "future")))]
pub mod localization;

#[cfg(feature = "sync")]
#[cfg_attr(docsrs, doc(cfg(feature = "sync")))]
pub mod sync;

pub use common::overrides::Override;
pub use notification::RemovalCause;

/// A transient request to drop cached values.
///
/// Signals are not persisted anywhere. They are either produced locally (for
/// example by [`PendingInvalidations`][pending] on commit) or delivered by a
/// remote transport such as [`InvalidationBus`][bus].
///
/// [pending]: ./deferred/struct.PendingInvalidations.html
/// [bus]: ./notification/struct.InvalidationBus.html
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InvalidationSignal<K> {
    /// Drop the value cached for this key.
    Key(K),
    /// Drop every cached value.
    All,
}

/// The inbound side of an invalidation transport.
///
/// Delivery is at-least-once, so implementations must be idempotent. All caches
/// in this crate are: invalidating an absent key, or clearing an empty cache, is a
/// no-op.
pub trait InvalidationHandler<K> {
    /// Discards what the signal names. Must not block on a computation that is
    /// in flight.
    fn on_invalidation(&self, signal: InvalidationSignal<K>);
}

impl<K, H> InvalidationHandler<K> for &H
where
    H: InvalidationHandler<K> + ?Sized,
{
    fn on_invalidation(&self, signal: InvalidationSignal<K>) {
        (**self).on_invalidation(signal)
    }
}

impl<K, H> InvalidationHandler<K> for std::sync::Arc<H>
where
    H: InvalidationHandler<K> + ?Sized,
{
    fn on_invalidation(&self, signal: InvalidationSignal<K>) {
        (**self).on_invalidation(signal)
    }
}
