use super::{Cache, LoadingCache, Slot};
use crate::{
    common::{
        base_cache::BaseCacheConfig, ensure_num_segments_or_panic, overrides::Override,
        DEFAULT_NUM_SEGMENTS,
    },
    notification::{InvalidationListener, RemovalCause},
};

use futures_util::future::BoxFuture;
use std::{
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash},
    marker::PhantomData,
    sync::Arc,
};

/// Builds a [`Cache`][cache-struct], a [`LoadingCache`][loading-cache-struct] or
/// a [`Slot`][slot-struct] with various configuration knobs.
///
/// [cache-struct]: ./struct.Cache.html
/// [loading-cache-struct]: ./struct.LoadingCache.html
/// [slot-struct]: ./struct.Slot.html
///
/// # Examples
///
/// ```rust
/// // Cargo.toml
/// //
/// // [dependencies]
/// // flightcache = { version = "0.1", features = ["future"] }
/// // futures-util = "0.3"
/// // tokio = { version = "1", features = ["rt-multi-thread", "macros" ] }
/// use flightcache::future::Cache;
/// use futures_util::FutureExt;
///
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() {
///     let pages = Cache::builder()
///         .name("pages")
///         .enable_stats()
///         .build_loading(|slug: Arc<String>| {
///             async move { Ok::<_, std::io::Error>(format!("<h1>{slug}</h1>")) }.boxed()
///         });
///
///     let page = pages.get_or_compute("home".to_string()).await.unwrap();
///     assert_eq!(page, "<h1>home</h1>");
///     assert_eq!(pages.stats().load_success_count(), 1);
/// }
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
    pub fn build(self) -> Cache<K, V, RandomState> {
        self.build_with_hasher(RandomState::default())
    }

    /// Builds a `Cache<K, V, S>` with the given `hasher`.
    pub fn build_with_hasher<S>(self, hasher: S) -> Cache<K, V, S>
    where
        S: BuildHasher + Clone + Send + Sync + 'static,
    {
        Cache::with_everything(self.into_config(), hasher)
    }

    /// Builds a `LoadingCache<K, V, E>` resolving missing values with the futures
    /// returned by `loader`.
    pub fn build_loading<E, F>(self, loader: F) -> LoadingCache<K, V, E, RandomState>
    where
        F: Fn(Arc<K>) -> BoxFuture<'static, Result<V, E>> + Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        LoadingCache::new(self.build(), Arc::new(loader))
    }

    /// Builds a `LoadingCache<K, V, E, S>` with the given `hasher`.
    pub fn build_loading_with_hasher<E, F, S>(
        self,
        loader: F,
        hasher: S,
    ) -> LoadingCache<K, V, E, S>
    where
        F: Fn(Arc<K>) -> BoxFuture<'static, Result<V, E>> + Send + Sync + 'static,
        E: Send + Sync + 'static,
        S: BuildHasher + Clone + Send + Sync + 'static,
    {
        LoadingCache::new(self.build_with_hasher(hasher), Arc::new(loader))
    }
}

impl<V> CacheBuilder<(), V, Cache<(), V, RandomState>>
where
    V: Clone + Send + Sync + 'static,
{
    /// Builds a `Slot<V>`, a cache holding at most one value.
    ///
    /// The `num_segments` and `initial_capacity` settings are ignored.
    pub fn build_slot(self) -> Slot<V> {
        let config = BaseCacheConfig {
            num_segments: 1,
            initial_capacity: Some(1),
            ..self.into_config()
        };
        Slot::with_cache(Cache::with_everything(config, RandomState::default()))
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
    /// is published.
    pub fn override_with(mut self, f: impl Fn(V) -> V + Send + Sync + 'static) -> Self {
        self.overrides.push(Arc::new(f));
        self
    }

    /// Sets the invalidation listener closure to the cache.
    ///
    /// The closure runs on the thread (or task) performing the invalidation, so
    /// it must not block.
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
