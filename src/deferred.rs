//! Invalidations held back until a unit of work completes.
//!
//! When a value is invalidated because the underlying store is being modified
//! inside a transaction, invalidating right away lets a concurrent reader
//! recompute the value from the _old_ state before the transaction commits.
//! [`PendingInvalidations`] records the invalidations instead, and applies them
//! only once the transaction has committed.
//!
//! # Examples
//!
//! ```rust
//! use flightcache::{deferred::PendingInvalidations, sync::Cache};
//!
//! let pages: Cache<String, String> = Cache::new();
//! pages.get_with("home".to_string(), || "<h1>Welcome</h1>".to_string());
//!
//! let mut pending = PendingInvalidations::new();
//! pending.invalidate("home".to_string());
//! // Not applied yet.
//! assert!(pages.contains_key(&"home".to_string()));
//!
//! // ... commit the transaction, then:
//! assert_eq!(pending.commit(&pages), 1);
//! assert!(!pages.contains_key(&"home".to_string()));
//! ```

use crate::{InvalidationHandler, InvalidationSignal};

use std::{collections::HashSet, hash::Hash};

/// A set of invalidations waiting for a unit of work to commit.
///
/// Requests are coalesced: the same key is invalidated once no matter how many
/// times it was requested, and a pending `invalidate_all` subsumes every key
/// request, before and after it.
///
/// Dropping a `PendingInvalidations` without calling [`commit`](#method.commit)
/// discards the requests, the same as [`rollback`](#method.rollback).
#[derive(Debug)]
pub struct PendingInvalidations<K> {
    keys: Vec<K>,
    seen: HashSet<K>,
    all: bool,
}

impl<K> Default for PendingInvalidations<K> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            seen: HashSet::new(),
            all: false,
        }
    }
}

impl<K> PendingInvalidations<K>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an invalidation of `key`.
    pub fn invalidate(&mut self, key: K) {
        if self.all {
            return;
        }
        if self.seen.insert(key.clone()) {
            self.keys.push(key);
        }
    }

    /// Records an invalidation of every key. Key requests recorded so far are
    /// dropped, as are the ones recorded from now on.
    pub fn invalidate_all(&mut self) {
        self.all = true;
        self.keys.clear();
        self.seen.clear();
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.keys.is_empty()
    }

    /// Returns the number of signals [`commit`](#method.commit) would deliver.
    pub fn len(&self) -> usize {
        if self.all {
            1
        } else {
            self.keys.len()
        }
    }

    /// Delivers the recorded invalidations to `handler` in the order they were
    /// first requested, and returns the number of signals delivered.
    pub fn commit<H>(self, handler: &H) -> usize
    where
        H: InvalidationHandler<K> + ?Sized,
    {
        let signals = self.into_signals();
        let count = signals.len();
        for signal in signals {
            handler.on_invalidation(signal);
        }
        count
    }

    /// Discards the recorded invalidations.
    pub fn rollback(self) {}

    /// Turns the recorded invalidations into signals, for delivery by other
    /// means such as an [`InvalidationBus`][bus].
    ///
    /// [bus]: ../notification/struct.InvalidationBus.html
    pub fn into_signals(self) -> Vec<InvalidationSignal<K>> {
        if self.all {
            vec![InvalidationSignal::All]
        } else {
            self.keys.into_iter().map(InvalidationSignal::Key).collect()
        }
    }
}
