use super::Cache;
use crate::{stats::CacheStats, InvalidationHandler, InvalidationSignal};

use futures_util::future::BoxFuture;
use std::{
    borrow::Borrow,
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash},
    sync::Arc,
};

/// The compute function of an async [`LoadingCache`][loading-cache].
///
/// It receives the key as an `Arc`, so that the returned future can own it.
///
/// [loading-cache]: ./struct.LoadingCache.html
pub type Loader<K, V, E> =
    Arc<dyn Fn(Arc<K>) -> BoxFuture<'static, Result<V, E>> + Send + Sync + 'static>;

/// An async [`Cache`][cache-struct] bound to the loader it was built with.
///
/// [cache-struct]: ./struct.Cache.html
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

    /// Returns a _clone_ of the value corresponding to the key, resolving the
    /// loader's future if it is missing.
    ///
    /// Concurrent calls on the same missing key resolve one future; all of them
    /// get its value, or a clone of the same `Arc<E>` when it fails. A failure is
    /// not cached.
    pub async fn get_or_compute(&self, key: K) -> Result<V, Arc<E>> {
        let key = Arc::new(key);
        // The loader is only called by the leader.
        let init = async {
            let load = (self.loader)(Arc::clone(&key));
            load.await
        };
        self.cache.try_get_with_shared(Arc::clone(&key), init).await
    }

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
