use super::{Cache, LoadingCache};
use crate::{
    common::{
        base_cache::BaseCacheConfig, ensure_num_segments_or_panic, overrides::Override,
        DEFAULT_NUM_SEGMENTS,
    },
    notification::{InvalidationListener, RemovalCause},
};

use std::{
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash},
    marker::PhantomData,
    sync::Arc,
};

/// Builds a [`Cache`][cache-struct] or a [`LoadingCache`][loading-cache-struct]
/// with various configuration knobs.
///
/// [cache-struct]: ./struct.Cache.html
/// [loading-cache-struct]: ./struct.LoadingCache.html
///
/// # Examples
///
/// ```rust
/// use flightcache::sync::Cache;
///
/// let cache = Cache::builder()
///     // A name shows up in log records.
///     .name("localized-strings")
///     // Post-process every computed value before it is published.
///     .override_with(|s: String| s.to_uppercase())
///     .enable_stats()
///     .build();
///
/// assert_eq!(cache.get_with(1, || "hello".to_string()), "HELLO");
/// assert_eq!(cache.stats().load_success_count(), 1);
/// ```
///
pub struct CacheBuilder<K, V, C> {
    name: Option<String>,
    num_segments: usize,
    initial_capacity: Option<usize>,
    overrides: Vec<Override<V>>,
    invalidation_listener: Option<InvalidationListener<K, V>>,
    stats_enabled: bool,
    cache_type: PhantomData<C>,
}

impl<K, V> Default for CacheBuilder<K, V, Cache<K, V, RandomState>>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            name: None,
            num_segments: DEFAULT_NUM_SEGMENTS,
            initial_capacity: None,
            overrides: Vec::new(),
            invalidation_listener: None,
            stats_enabled: false,
            cache_type: PhantomData,
        }
    }
}

impl<K, V> CacheBuilder<K, V, Cache<K, V, RandomState>>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Construct a new `CacheBuilder` that will be used to build a `Cache`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a `Cache<K, V>`.
    ///
    /// # Panics
    ///
    /// Panics if the configured `num_segments` is not a power of two.
    pub fn build(self) -> Cache<K, V, RandomState> {
        self.build_with_hasher(RandomState::default())
    }

    /// Builds a `Cache<K, V, S>` with the given `hasher`.
    ///
    /// # Panics
    ///
    /// Panics if the configured `num_segments` is not a power of two.
    pub fn build_with_hasher<S>(self, hasher: S) -> Cache<K, V, S>
    where
        S: BuildHasher + Clone + Send + Sync + 'static,
    {
        Cache::with_everything(self.into_config(), hasher)
    }

    /// Builds a `LoadingCache<K, V, E>` computing missing values with `loader`.
    ///
    /// # Panics
    ///
    /// Panics if the configured `num_segments` is not a power of two.
    pub fn build_loading<E, F>(self, loader: F) -> LoadingCache<K, V, E, RandomState>
    where
        F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        LoadingCache::new(self.build(), Arc::new(loader))
    }

    /// Builds a `LoadingCache<K, V, E, S>` computing missing values with
    /// `loader`, and hashing keys with the given `hasher`.
    pub fn build_loading_with_hasher<E, F, S>(
        self,
        loader: F,
        hasher: S,
    ) -> LoadingCache<K, V, E, S>
    where
        F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
        E: Send + Sync + 'static,
        S: BuildHasher + Clone + Send + Sync + 'static,
    {
        LoadingCache::new(self.build_with_hasher(hasher), Arc::new(loader))
    }
}

impl<K, V, C> CacheBuilder<K, V, C> {
    /// Sets the name of the cache. Currently the name is used for identification
    /// only in logging messages.
    pub fn name(self, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..self
        }
    }

    /// Sets the number of internal segments. Must be a power of two.
    ///
    /// An invalidation also discards the in-flight computations of the other
    /// keys in the same segment, so more segments mean fewer needless
    /// recomputations.
    ///
    /// # Panics
    ///
    /// Panics if `num_segments` is zero or not a power of two.
    pub fn num_segments(self, num_segments: usize) -> Self {
        ensure_num_segments_or_panic(num_segments);
        Self {
            num_segments,
            ..self
        }
    }

    /// Sets the initial capacity (number of entries) of the cache.
    pub fn initial_capacity(self, number_of_entries: usize) -> Self {
        Self {
            initial_capacity: Some(number_of_entries),
            ..self
        }
    }

    /// Appends a post-processing step applied to every computed value before it
    /// is published. Steps run in the order they were added.
    pub fn override_with(mut self, f: impl Fn(V) -> V + Send + Sync + 'static) -> Self {
        self.overrides.push(Arc::new(f));
        self
    }

    /// Sets the invalidation listener closure to the cache. It is called for
    /// every cached entry removed by an invalidation, after the entry has been
    /// removed.
    ///
    /// # Panics
    ///
    /// A panic in the listener is caught and disables the listener.
    pub fn invalidation_listener(
        self,
        listener: impl Fn(Arc<K>, V, RemovalCause) + Send + Sync + 'static,
    ) -> Self {
        Self {
            invalidation_listener: Some(Arc::new(listener)),
            ..self
        }
    }

    /// Enables recording of cache statistics.
    pub fn enable_stats(self) -> Self {
        Self {
            stats_enabled: true,
            ..self
        }
    }

    fn into_config(self) -> BaseCacheConfig<K, V> {
        BaseCacheConfig {
            name: self.name,
            num_segments: self.num_segments,
            initial_capacity: self.initial_capacity,
            overrides: self.overrides,
            invalidation_listener: self.invalidation_listener,
            stats_enabled: self.stats_enabled,
        }
    }
}
