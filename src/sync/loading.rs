use super::Cache;
use crate::{stats::CacheStats, InvalidationHandler, InvalidationSignal};

use std::{
    borrow::Borrow,
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash},
    sync::Arc,
};

/// The compute function of a [`LoadingCache`][loading-cache].
///
/// [loading-cache]: ./struct.LoadingCache.html
pub type Loader<K, V, E> = Arc<dyn Fn(&K) -> Result<V, E> + Send + Sync + 'static>;

/// A [`Cache`][cache-struct] bound to the compute function it was built with.
///
/// `LoadingCache` is built by [`CacheBuilder::build_loading`][build-loading].
///
/// # Examples
///
/// ```rust
/// use flightcache::sync::Cache;
///
/// #[derive(Debug)]
/// struct NotFound;
///
/// let pages = Cache::builder().build_loading(|slug: &String| match slug.as_str() {
///     "home" => Ok(format!("<h1>{slug}</h1>")),
///     _ => Err(NotFound),
/// });
///
/// assert_eq!(pages.get_or_compute("home".to_string()).unwrap(), "<h1>home</h1>");
/// assert!(pages.get_or_compute("missing".to_string()).is_err());
/// ```
///
/// [cache-struct]: ./struct.Cache.html
/// [build-loading]: ./struct.CacheBuilder.html#method.build_loading
pub struct LoadingCache<K, V, E, S = RandomState> {
    cache: Cache<K, V, S>,
    loader: Loader<K, V, E>,
}

impl<K, V, E, S> Clone for LoadingCache<K, V, E, S> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            loader: Arc::clone(&self.loader),
        }
    }
}

impl<K, V, E, S> LoadingCache<K, V, E, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(cache: Cache<K, V, S>, loader: Loader<K, V, E>) -> Self {
        Self { cache, loader }
    }

    /// Returns a _clone_ of the value corresponding to the key, computing it with
    /// the loader if it is missing.
    ///
    /// Concurrent calls on the same missing key run the loader once; all of them
    /// get its value, or a clone of the same `Arc<E>` when it fails. A failure is
    /// not cached.
    pub fn get_or_compute(&self, key: K) -> Result<V, Arc<E>> {
        let key = Arc::new(key);
        let loader = &self.loader;
        self.cache
            .try_get_with_shared(Arc::clone(&key), || loader(&key))
    }

    /// Returns the cached value without computing it.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        Arc<K>: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.cache.get(key)
    }

    pub fn invalidate<Q>(&self, key: &Q)
    where
        Arc<K>: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.cache.invalidate(key)
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all()
    }

    pub fn configure_override(&self, f: impl Fn(V) -> V + Send + Sync + 'static) {
        self.cache.configure_override(f)
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn generation(&self) -> u64 {
        self.cache.generation()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Returns the underlying cache, for calls that bypass the loader.
    pub fn cache(&self) -> &Cache<K, V, S> {
        &self.cache
    }
}

impl<K, V, E, S> InvalidationHandler<K> for LoadingCache<K, V, E, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn on_invalidation(&self, signal: InvalidationSignal<K>) {
        self.cache.on_invalidation(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::LoadingCache;
    use crate::{sync::Cache, InvalidationHandler, InvalidationSignal};

    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn counting_cache(calls: &Arc<AtomicUsize>) -> LoadingCache<u32, String, String> {
        let calls = Arc::clone(calls);
        Cache::builder().build_loading(move |k: &u32| {
            let n = calls.fetch_add(1, Ordering::AcqRel);
            if *k == 0 {
                Err(format!("no value for {k}"))
            } else {
                Ok(format!("{k}-{n}"))
            }
        })
    }

    #[test]
    fn compute_invalidate_recompute() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(&calls);

        assert_eq!(cache.get_or_compute(1).unwrap(), "1-0");
        assert_eq!(cache.get_or_compute(1).unwrap(), "1-0");
        cache.invalidate(&1);
        assert_eq!(cache.get_or_compute(1).unwrap(), "1-1");
        assert_eq!(calls.load(Ordering::Acquire), 2);

        cache.on_invalidation(InvalidationSignal::All);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get_or_compute(1).unwrap(), "1-2");
    }

    #[test]
    fn errors_are_returned_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(&calls);

        assert_eq!(*cache.get_or_compute(0).unwrap_err(), "no value for 0");
        assert_eq!(*cache.get_or_compute(0).unwrap_err(), "no value for 0");
        assert_eq!(calls.load(Ordering::Acquire), 2);
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn overrides_apply_to_loaded_values() {
        let cache = counting_cache(&Arc::new(AtomicUsize::new(0)));
        cache.configure_override(|s| format!("[{s}]"));
        assert_eq!(cache.get_or_compute(3).unwrap(), "[3-0]");
        assert!(cache.cache().contains_key(&3));
    }
}
