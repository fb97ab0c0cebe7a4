use crate::common::{base_cache::BaseCache, store::FlightId, MAX_INIT_RETRIES};

use async_lock::{RwLock, RwLockWriteGuard};
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::{
    any::{Any, TypeId},
    borrow::Borrow,
    collections::{hash_map::Entry, HashMap},
    future::Future,
    hash::{BuildHasher, Hash},
    sync::Arc,
    time::Instant,
};
use triomphe::Arc as TrioArc;

type ErrorObject = Arc<dyn Any + Send + Sync + 'static>;

pub(crate) enum InitResult<V, E> {
    Initialized(V),
    ReadExisting(V),
    InitErr(Arc<E>),
}

enum WaiterValue<V> {
    Computing,
    Ready(Result<V, ErrorObject>),
    InitFuturePanicked,
    // The future calling `get_with` or `try_get_with` was dropped before the
    // init future resolved.
    EnclosingFutureAborted,
}

type Waiter<V> = TrioArc<RwLock<WaiterValue<V>>>;
type WaiterMap<K, V, S> = Mutex<HashMap<(Arc<K>, TypeId), Waiter<V>, S>>;

/// Owns the leader's write lock. Dropping it without setting a value marks the
/// waiter as aborted, unregisters the flight and removes the waiter, so that one
/// of the followers can take over.
struct WaiterGuard<'a, K, V, S>
// NOTE: The Drop impl requires these bounds to be on the struct as well.
where
    K: Eq + Hash,
    V: Clone,
    S: BuildHasher + Clone,
{
    w_key: Option<(Arc<K>, TypeId)>,
    hash: u64,
    flight: Option<FlightId>,
    waiter: &'a Waiter<V>,
    waiters: &'a WaiterMap<K, V, S>,
    cache: &'a BaseCache<K, V, S>,
    write_lock: RwLockWriteGuard<'a, WaiterValue<V>>,
}

impl<'a, K, V, S> WaiterGuard<'a, K, V, S>
where
    K: Eq + Hash,
    V: Clone,
    S: BuildHasher + Clone,
{
    fn new(
        w_key: (Arc<K>, TypeId),
        hash: u64,
        waiter: &'a Waiter<V>,
        waiters: &'a WaiterMap<K, V, S>,
        cache: &'a BaseCache<K, V, S>,
        write_lock: RwLockWriteGuard<'a, WaiterValue<V>>,
    ) -> Self {
        Self {
            w_key: Some(w_key),
            hash,
            flight: None,
            waiter,
            waiters,
            cache,
            write_lock,
        }
    }

    fn set_waiter_value(mut self, v: WaiterValue<V>) {
        *self.write_lock = v;
        self.release();
    }

    fn release(&mut self) {
        if let Some(w_key) = self.w_key.take() {
            if let Some(flight) = self.flight.take() {
                self.cache.abandon(&w_key.0, self.hash, flight);
            }
            remove_waiter(self.waiters, &w_key, self.waiter);
        }
    }
}

impl<'a, K, V, S> Drop for WaiterGuard<'a, K, V, S>
where
    K: Eq + Hash,
    V: Clone,
    S: BuildHasher + Clone,
{
    fn drop(&mut self) {
        if self.w_key.is_some() {
            *self.write_lock = WaiterValue::EnclosingFutureAborted;
            self.release();
        }
    }
}

/// The async counterpart of the blocking initializer. Followers wait on an
/// `async_lock::RwLock` instead of blocking their thread.
pub(crate) struct ValueInitializer<K, V, S> {
    // TypeId is the type ID of the concrete error type of generic type E in the
    // try_get_with method. It is a part of the key so that the error object in a
    // waiter can always be downcast to the error type of its followers.
    waiters: WaiterMap<K, V, S>,
}

impl<K, V, S> ValueInitializer<K, V, S>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    pub(crate) fn with_hasher(hasher: S) -> Self {
        Self {
            waiters: Mutex::new(HashMap::with_hasher(hasher)),
        }
    }

    /// # Panics
    /// Panics if the `init` future has been panicked.
    pub(crate) async fn try_init_or_read<F, E>(
        &self,
        key: &Arc<K>,
        hash: u64,
        cache: &BaseCache<K, V, S>,
        init: F,
    ) -> InitResult<V, E>
    where
        F: Future<Output = Result<V, E>>,
        E: Send + Sync + 'static,
    {
        use std::panic::{resume_unwind, AssertUnwindSafe};
        use InitResult::*;

        let mut retries = 0;
        let w_key = (Arc::clone(key), TypeId::of::<E>());

        let waiter = TrioArc::new(RwLock::new(WaiterValue::Computing));
        // NOTE: The write lock must be held before the waiter is inserted, so
        // that any concurrent caller finding it will wait on it.
        let lock = waiter.write().await;

        loop {
            let Some(existing) = self.try_insert_waiter(&w_key, &waiter) else {
                break;
            };

            // Somebody else's waiter already exists. Wait for its result.
            let waiter_result = existing.read().await;
            match &*waiter_result {
                WaiterValue::Ready(Ok(value)) => return ReadExisting(value.clone()),
                WaiterValue::Ready(Err(e)) => return InitErr(downcast_error(e)),
                WaiterValue::InitFuturePanicked => {
                    retries += 1;
                    panic_if_retry_exhausted_for_panicking(retries);
                    continue;
                }
                WaiterValue::EnclosingFutureAborted => {
                    retries += 1;
                    panic_if_retry_exhausted_for_aborting(retries);
                    continue;
                }
                WaiterValue::Computing => panic!(
                    "Got unexpected state `Computing` after the leader released its waiter"
                ),
            }
        }

        // Our waiter was inserted. From here on, the guard removes it even when
        // this future is dropped.
        let mut waiter_guard = WaiterGuard::new(w_key, hash, &waiter, &self.waiters, cache, lock);

        let flight = match cache.get_or_begin(key, hash) {
            Ok(value) => {
                waiter_guard.set_waiter_value(WaiterValue::Ready(Ok(value.clone())));
                return ReadExisting(value);
            }
            Err(flight) => flight,
        };
        waiter_guard.flight = Some(flight);

        // Catching panic is safe here as we do not try to resolve the future
        // again.
        let started = Instant::now();
        let resolved = AssertUnwindSafe(init)
            .catch_unwind()
            .await
            .and_then(|result| {
                std::panic::catch_unwind(AssertUnwindSafe(|| {
                    result.map(|v| cache.apply_overrides(v))
                }))
            });

        match resolved {
            Ok(Ok(value)) => {
                cache.record_load_success(started);
                waiter_guard.flight = None;
                cache.publish(Arc::clone(key), hash, value.clone(), flight);
                waiter_guard.set_waiter_value(WaiterValue::Ready(Ok(value.clone())));
                Initialized(value)
            }
            Ok(Err(e)) => {
                cache.record_load_failure(started);
                let err = Arc::new(e);
                let err_obj: ErrorObject = Arc::clone(&err) as ErrorObject;
                waiter_guard.set_waiter_value(WaiterValue::Ready(Err(err_obj)));
                InitErr(err)
            }
            Err(payload) => {
                waiter_guard.set_waiter_value(WaiterValue::InitFuturePanicked);
                #[cfg(feature = "logging")]
                crate::common::log_panic(&*payload, "The init future", cache.name());
                resume_unwind(payload);
            }
        }
        // The write lock will be unlocked here.
    }

    /// Detaches the computations in flight for the key, so that callers arriving
    /// from now on start a new one instead of waiting for a result computed
    /// before an invalidation.
    pub(crate) fn detach<Q>(&self, key: &Q)
    where
        Arc<K>: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.waiters
            .lock()
            .retain(|(k, _), _| <Arc<K> as Borrow<Q>>::borrow(k) != key);
    }

    pub(crate) fn detach_all(&self) {
        self.waiters.lock().clear();
    }

    /// Inserts the waiter unless there is one already, which is returned instead.
    #[inline]
    fn try_insert_waiter(&self, w_key: &(Arc<K>, TypeId), waiter: &Waiter<V>) -> Option<Waiter<V>> {
        match self.waiters.lock().entry(w_key.clone()) {
            Entry::Occupied(e) => Some(TrioArc::clone(e.get())),
            Entry::Vacant(e) => {
                e.insert(TrioArc::clone(waiter));
                None
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

/// Removes the waiter unless it has been detached and replaced by a newer one.
fn remove_waiter<K, V, S>(
    waiters: &WaiterMap<K, V, S>,
    w_key: &(Arc<K>, TypeId),
    waiter: &Waiter<V>,
) where
    K: Eq + Hash,
    S: BuildHasher,
{
    let mut waiters = waiters.lock();
    if matches!(waiters.get(w_key), Some(w) if TrioArc::ptr_eq(w, waiter)) {
        waiters.remove(w_key);
    }
}

fn downcast_error<E>(e: &ErrorObject) -> Arc<E>
where
    E: Send + Sync + 'static,
{
    match Arc::clone(e).downcast::<E>() {
        Ok(e) => e,
        Err(_) => unreachable!("waiter holds an error of an unexpected type"),
    }
}

fn panic_if_retry_exhausted_for_panicking(retries: usize) {
    if retries >= MAX_INIT_RETRIES {
        panic!(
            "Too many retries. Tried to read the return value from the `init` future \
            but failed {retries} times. Maybe the `init` kept panicking?"
        );
    }
}

fn panic_if_retry_exhausted_for_aborting(retries: usize) {
    if retries >= MAX_INIT_RETRIES {
        panic!(
            "Too many retries. Tried to read the return value from the `init` future \
            but failed {retries} times. Maybe the future containing `get_with` or \
            `try_get_with` kept being aborted?"
        );
    }
}
