use crate::common::{base_cache::BaseCache, MAX_INIT_RETRIES};

use parking_lot::{Mutex, RwLock};
use std::{
    any::{Any, TypeId},
    borrow::Borrow,
    collections::{hash_map::Entry, HashMap},
    convert::Infallible,
    hash::{BuildHasher, Hash},
    sync::Arc,
    time::Instant,
};
use triomphe::Arc as TrioArc;

type ErrorObject = Arc<dyn Any + Send + Sync + 'static>;
// `None` means the computation panicked. Waiters will retry.
type WaiterValue<V> = Option<Result<V, ErrorObject>>;
type Waiter<V> = TrioArc<RwLock<WaiterValue<V>>>;

pub(crate) enum InitResult<V, E> {
    Initialized(V),
    ReadExisting(V),
    InitErr(Arc<E>),
}

/// Collapses concurrent computations for the same key into one.
///
/// The first caller inserts a waiter, write-locked, into the waiter map and
/// becomes the leader. Everybody arriving later finds the waiter and blocks on
/// its read lock until the leader has stored the outcome into it.
pub(crate) struct ValueInitializer<K, V, S> {
    // TypeId is the type ID of the concrete error type of generic type E in the
    // try_get_with method. We use the type ID as a part of the key to ensure that
    // we can always downcast the trait object ErrorObject (in Waiter<V>) into
    // its concrete type.
    waiters: Mutex<HashMap<(Arc<K>, TypeId), Waiter<V>, S>>,
}

impl<K, V, S> ValueInitializer<K, V, S>
where
    K: Eq + Hash,
    V: Clone,
    S: BuildHasher + Clone,
{
    pub(crate) fn with_hasher(hasher: S) -> Self {
        Self {
            waiters: Mutex::new(HashMap::with_hasher(hasher)),
        }
    }

    /// # Panics
    /// Panics if the `init` closure has been panicked.
    pub(crate) fn init_or_read(
        &self,
        key: &Arc<K>,
        hash: u64,
        cache: &BaseCache<K, V, S>,
        init: impl FnOnce() -> V,
    ) -> InitResult<V, Infallible> {
        self.do_try_init(key, hash, cache, || Ok(init()))
    }

    /// # Panics
    /// Panics if the `init` closure has been panicked.
    pub(crate) fn try_init_or_read<E>(
        &self,
        key: &Arc<K>,
        hash: u64,
        cache: &BaseCache<K, V, S>,
        init: impl FnOnce() -> Result<V, E>,
    ) -> InitResult<V, E>
    where
        E: Send + Sync + 'static,
    {
        self.do_try_init(key, hash, cache, init)
    }

    fn do_try_init<E>(
        &self,
        key: &Arc<K>,
        hash: u64,
        cache: &BaseCache<K, V, S>,
        init: impl FnOnce() -> Result<V, E>,
    ) -> InitResult<V, E>
    where
        E: Send + Sync + 'static,
    {
        use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
        use InitResult::*;

        let mut retries = 0;
        let w_key = (Arc::clone(key), TypeId::of::<E>());

        loop {
            let waiter = TrioArc::new(RwLock::new(None));
            let mut lock = waiter.write();

            let Some(existing) = self.try_insert_waiter(&w_key, &waiter) else {
                // Our waiter was inserted. Check if the value has already been
                // published by another thread, and register a flight otherwise.
                let flight = match cache.get_or_begin(key, hash) {
                    Ok(value) => {
                        *lock = Some(Ok(value.clone()));
                        self.remove_waiter(&w_key, &waiter);
                        return ReadExisting(value);
                    }
                    Err(flight) => flight,
                };

                // The value still does not exist. Let's evaluate the init closure
                // and the overrides. Catching panic is safe here as we do not try
                // to evaluate the closure again.
                let started = Instant::now();
                let result =
                    catch_unwind(AssertUnwindSafe(|| init().map(|v| cache.apply_overrides(v))));

                match result {
                    Ok(Ok(value)) => {
                        cache.record_load_success(started);
                        cache.publish(Arc::clone(key), hash, value.clone(), flight);
                        *lock = Some(Ok(value.clone()));
                        self.remove_waiter(&w_key, &waiter);
                        return Initialized(value);
                    }
                    Ok(Err(e)) => {
                        cache.record_load_failure(started);
                        cache.abandon(key, hash, flight);
                        let err = Arc::new(e);
                        let err_obj: ErrorObject = Arc::clone(&err) as ErrorObject;
                        *lock = Some(Err(err_obj));
                        self.remove_waiter(&w_key, &waiter);
                        return InitErr(err);
                    }
                    Err(payload) => {
                        cache.abandon(key, hash, flight);
                        *lock = None;
                        // Remove the waiter so that others can retry.
                        self.remove_waiter(&w_key, &waiter);
                        #[cfg(feature = "logging")]
                        crate::common::log_panic(&*payload, "The init closure", cache.name());
                        resume_unwind(payload);
                    }
                } // The write lock will be unlocked here.
            };

            // Somebody else's waiter already exists. Drop our write lock and wait
            // for the read lock to become available.
            std::mem::drop(lock);
            let outcome = existing.read();
            match &*outcome {
                Some(Ok(value)) => return ReadExisting(value.clone()),
                Some(Err(e)) => return InitErr(downcast_error(e)),
                // None means somebody else's init closure has been panicked.
                None => {
                    retries += 1;
                    if retries >= MAX_INIT_RETRIES {
                        panic!(
                            "Too many retries. Tried to read the return value from the `init` \
                            closure but failed {retries} times. Maybe the `init` kept panicking?"
                        );
                    }
                }
            }
            // Retry from the beginning.
        }
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

    /// Removes the waiter unless it has been detached and replaced by a newer
    /// one.
    #[inline]
    fn remove_waiter(&self, w_key: &(Arc<K>, TypeId), waiter: &Waiter<V>) {
        let mut waiters = self.waiters.lock();
        if matches!(waiters.get(w_key), Some(w) if TrioArc::ptr_eq(w, waiter)) {
            waiters.remove(w_key);
        }
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

fn downcast_error<E>(e: &ErrorObject) -> Arc<E>
where
    E: Send + Sync + 'static,
{
    // The waiter key includes the TypeId of E, so the error object in a waiter
    // found by this key was created from an E.
    match Arc::clone(e).downcast::<E>() {
        Ok(e) => e,
        Err(_) => unreachable!("waiter holds an error of an unexpected type"),
    }
}
