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
    convert::Infallible,
    fmt,
    future::Future,
    hash::{BuildHasher, Hash},
    sync::Arc,
};

/// A thread-safe, futures-aware, lazily populated cache whose values are
/// computed at most once per key at a time.
///
/// Values are produced by the future given to [`get_with`](#method.get_with) or
/// [`try_get_with`](#method.try_get_with) when a key is missing. Callers waiting
/// for somebody else's computation are suspended, not blocked, so the cache can
/// be used from any async runtime.
///
/// # Examples
///
/// ```rust
/// // Cargo.toml
/// //
/// // [dependencies]
/// // flightcache = { version = "0.1", features = ["future"] }
/// // tokio = { version = "1", features = ["rt-multi-thread", "macros" ] }
/// // futures-util = "0.3"
///
/// use flightcache::future::Cache;
///
/// #[tokio::main]
/// async fn main() {
///     let cache: Cache<u32, String> = Cache::new();
///
///     // Four tasks ask for the same key at the same time. Only one of the init
///     // futures is resolved.
///     let tasks: Vec<_> = (0..4)
///         .map(|i| {
///             let my_cache = cache.clone();
///             tokio::spawn(async move {
///                 my_cache
///                     .get_with(7, async move { format!("computed by task {i}") })
///                     .await
///             })
///         })
///         .collect();
///
///     let values: Vec<String> = futures_util::future::join_all(tasks)
///         .await
///         .into_iter()
///         .map(Result::unwrap)
///         .collect();
///     assert!(values.windows(2).all(|w| w[0] == w[1]));
///
///     cache.invalidate(&7);
///     assert!(cache.get(&7).is_none());
/// }
/// ```
///
/// # Cancellation
///
/// Dropping the future returned by `get_with` or `try_get_with` while its init
/// future is being resolved leaves the key empty. If other callers were waiting
/// for it, one of them resolves its own init future instead.
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
    /// This method never waits for a computation in progress.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        Arc<K>: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.base.get_with_hash(key, self.base.hash(key))
    }

    /// Returns `true` if the cache holds a value for the key, without recording
    /// a hit or a miss.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        Arc<K>: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.base.contains_key(key)
    }

    /// Returns a _clone_ of the value corresponding to the key. If the value does
    /// not exist, resolves the `init` future, applies the registered overrides to
    /// its output and publishes it.
    ///
    /// # Concurrent calls on the same key
    ///
    /// This method guarantees that concurrent calls on the same not-existing key
    /// are coalesced into one evaluation of the `init` future. Only one of the
    /// calls evaluates its future, and other calls wait for that future to
    /// resolve.
    ///
    /// If the key is invalidated while the future is being resolved, the value
    /// is still returned to every waiting caller, but it is not kept in the
    /// cache.
    ///
    /// # Panics
    ///
    /// This method panics when the `init` future has panicked. When it happens,
    /// only the caller whose `init` future panicked will get the panic. If there
    /// are other calls in progress, this method will restart and resolve one of
    /// the remaining `init` futures.
    pub async fn get_with(&self, key: K, init: impl Future<Output = V>) -> V {
        let hash = self.base.hash(&key);
        if let Some(value) = self.base.get_with_hash(&key, hash) {
            return value;
        }

        let key = Arc::new(key);
        let init = async move { Ok::<_, Infallible>(init.await) };
        match self
            .value_initializer
            .try_init_or_read(&key, hash, &self.base, init)
            .await
        {
            InitResult::Initialized(v) | InitResult::ReadExisting(v) => v,
            InitResult::InitErr(e) => match *e {},
        }
    }

    /// Try to ensure the value of the key exists by resolving the `init` future
    /// if it does not, and returns a _clone_ of the value or the `Err` returned by
    /// the future.
    ///
    /// An `Err` is never cached. Every call that was waiting for the failed
    /// future receives a clone of the same `Arc<E>`.
    ///
    /// # Panics
    ///
    /// This method panics when the `init` future has panicked. See
    /// [`get_with`](#method.get_with) for details.
    pub async fn try_get_with<F, E>(&self, key: K, init: F) -> Result<V, Arc<E>>
    where
        F: Future<Output = Result<V, E>>,
        E: Send + Sync + 'static,
    {
        self.try_get_with_shared(Arc::new(key), init).await
    }

    pub(crate) async fn try_get_with_shared<F, E>(
        &self,
        key: Arc<K>,
        init: F,
    ) -> Result<V, Arc<E>>
    where
        F: Future<Output = Result<V, E>>,
        E: Send + Sync + 'static,
    {
        let hash = self.base.hash(&key);
        if let Some(value) = self.base.get_with_hash(&key, hash) {
            return Ok(value);
        }

        match self
            .value_initializer
            .try_init_or_read(&key, hash, &self.base, init)
            .await
        {
            InitResult::Initialized(v) | InitResult::ReadExisting(v) => Ok(v),
            InitResult::InitErr(e) => Err(e),
        }
    }

    /// Discards any cached value for the key, and any value for the key being
    /// computed right now.
    ///
    /// This method does not wait for anything, so it is a plain function that can
    /// be called from synchronous event handlers as well.
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
impl<K, V, S> Cache<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    pub(crate) fn waiter_count(&self) -> usize {
        self.value_initializer.waiter_count()
    }
}
