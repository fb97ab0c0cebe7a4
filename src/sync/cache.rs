use super::{
    value_initializer::{InitResult, ValueInitializer},
    CacheBuilder,
};
use crate::{
    common::base_cache::{BaseCache, BaseCacheConfig},
    notification::RemovalCause,
    stats::CacheStats,
    InvalidationHandler, InvalidationSignal,
};

use std::{
    borrow::Borrow,
    collections::hash_map::RandomState,
    fmt,
    hash::{BuildHasher, Hash},
    sync::Arc,
};

/// A thread-safe, lazily populated cache whose values are computed at most once
/// per key at a time.
///
/// Values are never inserted directly. They are produced by the closure given to
/// [`get_with`](#method.get_with) or [`try_get_with`](#method.try_get_with) when a
/// key is missing, and stay cached until they are invalidated.
///
/// # Examples
///
/// Here's an example of computing a value once while several threads ask for it:
///
/// ```rust
/// use flightcache::sync::Cache;
///
/// use std::{
///     sync::atomic::{AtomicUsize, Ordering},
///     sync::Arc,
///     thread,
/// };
///
/// let cache: Cache<&str, String> = Cache::new();
/// let computations = Arc::new(AtomicUsize::new(0));
///
/// let threads: Vec<_> = (0..8)
///     .map(|_| {
///         // To share the same cache across the threads, clone it.
///         // This is a cheap operation.
///         let my_cache = cache.clone();
///         let my_computations = Arc::clone(&computations);
///         thread::spawn(move || {
///             my_cache.get_with("settings", || {
///                 my_computations.fetch_add(1, Ordering::AcqRel);
///                 "computed".to_string()
///             })
///         })
///     })
///     .collect();
///
/// for t in threads {
///     assert_eq!(t.join().unwrap(), "computed");
/// }
/// assert_eq!(computations.load(Ordering::Acquire), 1);
///
/// // After an invalidation, the next caller computes again.
/// cache.invalidate(&"settings");
/// assert!(cache.get(&"settings").is_none());
/// ```
///
/// # Sharing a cache across threads
///
/// To share a cache across threads, do one of the followings:
///
/// - Create a clone of the cache by calling its `clone` method and pass it to
///   other thread.
/// - Wrap the cache by a `sync::OnceCell` or `sync::Lazy` from
///   [once_cell][once-cell-crate] create, and set it to a `static` variable.
///
/// Cloning is a cheap operation for `Cache` as it only creates thread-safe
/// reference-counted pointers to the internal data structures.
///
/// [once-cell-crate]: https://crates.io/crates/once_cell
///
/// # Hashing Algorithm
///
/// By default, `Cache` uses a hashing algorithm selected to provide resistance
/// against HashDoS attacks. It will be the same one used by
/// `std::collections::HashMap`, which is currently SipHash 1-3.
///
/// The hashing algorithm can be replaced on a per-`Cache` basis using the
/// [`build_with_hasher`][build-with-hasher-method] method of the `CacheBuilder`.
///
/// [build-with-hasher-method]: ./struct.CacheBuilder.html#method.build_with_hasher
pub struct Cache<K, V, S = RandomState> {
    base: BaseCache<K, V, S>,
    value_initializer: Arc<ValueInitializer<K, V, S>>,
}

impl<K, V, S> Clone for Cache<K, V, S> {
    /// Makes a clone of this shared cache.
    ///
    /// This operation is cheap as it only creates thread-safe reference counted
    /// pointers to the shared internal data structures.
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            value_initializer: Arc::clone(&self.value_initializer),
        }
    }
}

impl<K, V, S> fmt::Debug for Cache<K, V, S>
where
    K: Hash + Eq,
    V: Clone,
    S: BuildHasher + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.base.name())
            .field("entry_count", &self.base.entry_count())
            .field("generation", &self.base.generation())
            .finish()
    }
}

impl<K, V> Cache<K, V, RandomState>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Constructs a new, empty `Cache<K, V>`.
    ///
    /// To adjust various configuration knobs such as `name` or `num_segments`, use
    /// the [`CacheBuilder`][builder-struct].
    ///
    /// [builder-struct]: ./struct.CacheBuilder.html
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns a [`CacheBuilder`][builder-struct], which can builds a `Cache` or
    /// a `LoadingCache` with various configuration knobs.
    ///
    /// [builder-struct]: ./struct.CacheBuilder.html
    pub fn builder() -> CacheBuilder<K, V, Cache<K, V, RandomState>> {
        CacheBuilder::default()
    }
}

impl<K, V> Default for Cache<K, V, RandomState>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> Cache<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    pub(crate) fn with_everything(config: BaseCacheConfig<K, V>, build_hasher: S) -> Self {
        Self {
            value_initializer: Arc::new(ValueInitializer::with_hasher(build_hasher.clone())),
            base: BaseCache::new(config, build_hasher),
        }
    }

    /// Returns cache’s name.
    pub fn name(&self) -> Option<&str> {
        self.base.name()
    }

    /// Returns a _clone_ of the value corresponding to the key, if it has been
    /// computed and not invalidated since.
    ///
    /// If you want to store values that will be expensive to clone, wrap them by
    /// `std::sync::Arc` before storing in a cache. [`Arc`][rustdoc-std-arc] is a
    /// thread-safe reference-counted pointer and its `clone()` method is cheap.
    ///
    /// The key may be any borrowed form of the cache's key type, but `Hash` and `Eq`
    /// on the borrowed form _must_ match those for the key type.
    ///
    /// [rustdoc-std-arc]: https://doc.rust-lang.org/stable/std/sync/struct.Arc.html
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        Arc<K>: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.base.get_with_hash(key, self.base.hash(key))
    }

    /// Returns `true` if the cache holds a value for the key.
    ///
    /// Unlike [`get`](#method.get), this method does not record a hit or a miss.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        Arc<K>: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.base.contains_key(key)
    }

    /// Returns a _clone_ of the value corresponding to the key. If the value does
    /// not exist, evaluates the `init` closure, applies the registered overrides
    /// to its result and publishes it.
    ///
    /// # Concurrent calls on the same key
    ///
    /// This method guarantees that concurrent calls on the same not-existing key
    /// are coalesced into one evaluation of the `init` closure. Only one of the
    /// calls evaluates its closure, and other calls wait for that closure to
    /// complete. All of them receive the same value.
    ///
    /// If the key is invalidated while the closure is being evaluated, the value
    /// is still returned to every waiting caller, but it is not kept in the
    /// cache.
    ///
    /// # Panics
    ///
    /// This method panics when the `init` closure has panicked. When it happens,
    /// only the caller whose `init` closure panicked will get the panic. If there
    /// are other calls in progress, this method will restart and resolve one of
    /// the remaining `init` closure.
    pub fn get_with(&self, key: K, init: impl FnOnce() -> V) -> V {
        let hash = self.base.hash(&key);
        if let Some(value) = self.base.get_with_hash(&key, hash) {
            return value;
        }

        let key = Arc::new(key);
        match self
            .value_initializer
            .init_or_read(&key, hash, &self.base, init)
        {
            InitResult::Initialized(v) | InitResult::ReadExisting(v) => v,
            InitResult::InitErr(e) => match *e {},
        }
    }

    /// Try to ensure the value of the key exists by evaluating the `init` closure
    /// if it does not, and returns a _clone_ of the value or the `Err` returned by
    /// the closure.
    ///
    /// An `Err` is never cached: the next call for the key evaluates a closure
    /// again.
    ///
    /// # Concurrent calls on the same key
    ///
    /// This method guarantees that concurrent calls on the same not-existing key
    /// are coalesced into one evaluation of the `init` closure (as long as these
    /// closures return the same error type). Only one of the calls evaluates its
    /// closure, and other calls wait for that closure to complete.
    ///
    /// When the closure fails, every call that was waiting for it receives a
    /// clone of the same `Arc<E>`.
    ///
    /// # Panics
    ///
    /// This method panics when the `init` closure has panicked. When it happens,
    /// only the caller whose `init` closure panicked will get the panic. If there
    /// are other calls in progress, this method will restart and resolve one of
    /// the remaining `init` closure.
    pub fn try_get_with<F, E>(&self, key: K, init: F) -> Result<V, Arc<E>>
    where
        F: FnOnce() -> Result<V, E>,
        E: Send + Sync + 'static,
    {
        self.try_get_with_shared(Arc::new(key), init)
    }

    pub(crate) fn try_get_with_shared<F, E>(&self, key: Arc<K>, init: F) -> Result<V, Arc<E>>
    where
        F: FnOnce() -> Result<V, E>,
        E: Send + Sync + 'static,
    {
        let hash = self.base.hash(&key);
        if let Some(value) = self.base.get_with_hash(&key, hash) {
            return Ok(value);
        }

        match self
            .value_initializer
            .try_init_or_read(&key, hash, &self.base, init)
        {
            InitResult::Initialized(v) | InitResult::ReadExisting(v) => Ok(v),
            InitResult::InitErr(e) => Err(e),
        }
    }

    /// Discards any cached value for the key.
    ///
    /// If a value for the key is being computed right now, it will not be kept
    /// either, and calls made after this method returns compute a new value
    /// instead of waiting for it. Invalidating a key that is not cached is a
    /// no-op.
    ///
    /// The key may be any borrowed form of the cache's key type, but `Hash` and `Eq`
    /// on the borrowed form _must_ match those for the key type.
    pub fn invalidate<Q>(&self, key: &Q)
    where
        Arc<K>: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.invalidate_with_cause(key, RemovalCause::Explicit);
    }

    /// Discards all cached values, and every value being computed right now.
    pub fn invalidate_all(&self) {
        self.invalidate_all_with_cause(RemovalCause::Explicit);
    }

    fn invalidate_with_cause<Q>(&self, key: &Q, cause: RemovalCause)
    where
        Arc<K>: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.base.invalidate(key, cause);
        // A computation that started before this point may still finish, but
        // nobody arriving from now on will wait for it.
        self.value_initializer.detach(key);
    }

    fn invalidate_all_with_cause(&self, cause: RemovalCause) {
        self.base.invalidate_all(cause);
        self.value_initializer.detach_all();
    }

    /// Registers a post-processing step for values computed from now on.
    ///
    /// Values that are already cached are not affected; call
    /// [`invalidate_all`](#method.invalidate_all) to have them recomputed.
    pub fn configure_override(&self, f: impl Fn(V) -> V + Send + Sync + 'static) {
        self.base.push_override(Arc::new(f));
    }

    /// Returns the number of cached values.
    pub fn entry_count(&self) -> u64 {
        self.base.entry_count()
    }

    /// Returns how many invalidations this cache has seen, including
    /// invalidations of absent keys.
    pub fn generation(&self) -> u64 {
        self.base.generation()
    }

    /// Returns the number of internal segments of this cache.
    pub fn num_segments(&self) -> usize {
        self.base.num_segments()
    }

    /// Returns a snapshot of the cache statistics. All counts are zero unless the
    /// cache was built with [`enable_stats`][enable-stats].
    ///
    /// [enable-stats]: ./struct.CacheBuilder.html#method.enable_stats
    pub fn stats(&self) -> CacheStats {
        self.base.stats()
    }
}

impl<K, V, S> InvalidationHandler<K> for Cache<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn on_invalidation(&self, signal: InvalidationSignal<K>) {
        match signal {
            InvalidationSignal::Key(key) => {
                self.invalidate_with_cause(&key, RemovalCause::Signaled)
            }
            InvalidationSignal::All => self.invalidate_all_with_cause(RemovalCause::Signaled),
        }
    }
}

// For unit tests.
#[cfg(test)]
impl<K, V, S> Cache<K, V, S> {
    pub(crate) fn waiter_count(&self) -> usize
    where
        K: Hash + Eq,
        V: Clone,
        S: BuildHasher + Clone,
    {
        self.value_initializer.waiter_count()
    }
}

#[cfg(test)]
mod tests {
    use super::Cache;
    use crate::{notification::RemovalCause, InvalidationHandler, InvalidationSignal};

    use parking_lot::Mutex;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Barrier,
        },
        thread,
        time::Duration,
    };

    #[test]
    fn basic_single_thread() {
        let cache: Cache<&str, &str> = Cache::builder().name("basic").enable_stats().build();
        assert_eq!(cache.name(), Some("basic"));

        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get_with("a", || "alice"), "alice");
        assert_eq!(cache.get_with("a", || "anna"), "alice");
        assert_eq!(cache.get(&"a"), Some("alice"));
        assert!(cache.contains_key(&"a"));
        assert_eq!(cache.entry_count(), 1);

        cache.invalidate(&"a");
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get_with("a", || "anna"), "anna");

        let stats = cache.stats();
        // get, get_with (miss), get_with (hit), get, get, get_with (miss)
        assert_eq!(stats.hit_count(), 2);
        assert_eq!(stats.miss_count(), 4);
        assert_eq!(stats.load_success_count(), 2);
        assert_eq!(stats.invalidation_count(), 1);
    }

    #[test]
    fn failure_is_not_cached() {
        let cache: Cache<u32, String> = Cache::new();
        let calls = AtomicUsize::new(0);

        let compute = || {
            if calls.fetch_add(1, Ordering::AcqRel) == 0 {
                Err("source unavailable")
            } else {
                Ok("value".to_string())
            }
        };

        assert_eq!(
            cache.try_get_with(1, compute).map_err(|e| *e),
            Err("source unavailable")
        );
        assert!(!cache.contains_key(&1));
        assert_eq!(cache.try_get_with(1, compute), Ok("value".to_string()));
        assert_eq!(calls.load(Ordering::Acquire), 2);
        assert_eq!(cache.waiter_count(), 0);
    }

    #[test]
    fn invalidate_absent_and_clear_empty_are_noops() {
        let cache: Cache<u32, u32> = Cache::new();
        cache.invalidate(&7);
        cache.invalidate_all();
        cache.on_invalidation(InvalidationSignal::Key(7));
        cache.on_invalidation(InvalidationSignal::All);
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.generation(), 4);
    }

    #[test]
    fn invalidate_all_clears_every_key() {
        let cache: Cache<&str, u32> = Cache::new();
        let calls = AtomicUsize::new(0);
        let compute = || calls.fetch_add(1, Ordering::AcqRel) as u32;

        for k in ["a", "b", "c"] {
            cache.get_with(k, compute);
        }
        assert_eq!(cache.entry_count(), 3);
        cache.invalidate_all();
        assert_eq!(cache.entry_count(), 0);
        for k in ["a", "b", "c"] {
            cache.get_with(k, compute);
        }
        assert_eq!(calls.load(Ordering::Acquire), 6);
    }

    #[test]
    fn overrides_run_once_per_computation() {
        let cache: Cache<u32, Vec<&str>> = Cache::builder()
            .override_with(|mut v: Vec<&str>| {
                v.push("builder");
                v
            })
            .build();
        cache.configure_override(|mut v| {
            v.push("runtime");
            v
        });

        assert_eq!(cache.get_with(1, || vec!["raw"]), vec!["raw", "builder", "runtime"]);
        // Cached, so the overrides do not run again.
        assert_eq!(cache.get_with(1, Vec::new), vec!["raw", "builder", "runtime"]);
    }

    #[test]
    fn listener_sees_explicit_and_signaled_removals() {
        let removed = Arc::new(Mutex::new(Vec::new()));
        let removed1 = Arc::clone(&removed);
        let cache = Cache::builder()
            .invalidation_listener(move |k: Arc<&'static str>, v: u32, cause| {
                removed1.lock().push((*k, v, cause))
            })
            .build();

        cache.get_with("a", || 1);
        cache.get_with("b", || 2);
        cache.invalidate(&"a");
        cache.on_invalidation(InvalidationSignal::Key("b"));

        assert_eq!(
            *removed.lock(),
            vec![
                ("a", 1, RemovalCause::Explicit),
                ("b", 2, RemovalCause::Signaled)
            ]
        );
    }

    #[test]
    fn invalidation_during_computation_discards_result() {
        let cache: Cache<&str, u32> = Cache::builder().enable_stats().build();
        let started = Arc::new(Barrier::new(2));
        let invalidated = Arc::new(Barrier::new(2));

        let leader = {
            let cache = cache.clone();
            let started = Arc::clone(&started);
            let invalidated = Arc::clone(&invalidated);
            thread::spawn(move || {
                cache.get_with("k", || {
                    started.wait();
                    invalidated.wait();
                    1
                })
            })
        };

        started.wait();
        cache.invalidate(&"k");
        invalidated.wait();

        // The leader still gets its value...
        assert_eq!(leader.join().unwrap(), 1);
        // ...but it was not kept.
        assert_eq!(cache.get(&"k"), None);
        assert_eq!(cache.get_with("k", || 2), 2);
        assert_eq!(cache.stats().stale_load_count(), 1);
    }

    #[test]
    fn waiters_share_the_leaders_error() {
        const NUM_THREADS: usize = 8;
        let cache: Cache<&str, u32> = Cache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(NUM_THREADS));

        let threads: Vec<_> = (0..NUM_THREADS)
            .map(|_| {
                let cache = cache.clone();
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.try_get_with("k", || {
                        calls.fetch_add(1, Ordering::AcqRel);
                        // Give the other threads time to join.
                        thread::sleep(Duration::from_millis(200));
                        Err("failed".to_string())
                    })
                })
            })
            .collect();

        let errors: Vec<Arc<String>> = threads
            .into_iter()
            .map(|t| t.join().unwrap().unwrap_err())
            .collect();

        // Everybody who joined the leader's computation got the very same error.
        // Late comers (if any) computed again and failed on their own.
        let calls = calls.load(Ordering::Acquire);
        assert!(calls >= 1);
        let distinct = errors
            .iter()
            .fold(Vec::<&Arc<String>>::new(), |mut acc, e| {
                if !acc.iter().any(|a| Arc::ptr_eq(a, e)) {
                    acc.push(e);
                }
                acc
            })
            .len();
        assert_eq!(distinct, calls);
        assert!(errors.iter().all(|e| e.as_str() == "failed"));
        assert!(!cache.contains_key(&"k"));
    }

    #[test]
    fn panicking_init_lets_a_waiter_take_over() {
        let cache: Cache<&str, u32> = Cache::new();
        let started = Arc::new(Barrier::new(2));

        let panicking = {
            let cache = cache.clone();
            let started = Arc::clone(&started);
            thread::spawn(move || {
                cache.get_with("k", || {
                    started.wait();
                    thread::sleep(Duration::from_millis(100));
                    panic!("init panicked");
                })
            })
        };

        started.wait();
        let value = cache.get_with("k", || 5);
        assert_eq!(value, 5);
        assert!(panicking.join().is_err());
        assert_eq!(cache.get(&"k"), Some(5));
        assert_eq!(cache.waiter_count(), 0);
    }
}
