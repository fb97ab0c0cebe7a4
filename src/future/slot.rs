use super::Cache;
use crate::{stats::CacheStats, InvalidationHandler, InvalidationSignal};

use std::{future::Future, sync::Arc};

/// A cache holding a single lazily computed value.
///
/// `Slot` is for values that are derived from global state as a whole, such as
/// settings, and that are thrown away as a whole when the state changes. It has
/// the same single-flight and invalidation guarantees as [`Cache`][cache-struct].
///
/// # Examples
///
/// ```rust
/// use flightcache::future::Slot;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let slot: Slot<Vec<&str>> = Slot::new();
/// slot.configure_override(|mut cultures| {
///     cultures.sort();
///     cultures
/// });
///
/// assert_eq!(slot.get_with(async { vec!["fr", "en"] }).await, vec!["en", "fr"]);
///
/// slot.invalidate();
/// assert!(slot.get().is_none());
/// # }
/// ```
///
/// [cache-struct]: ./struct.Cache.html
pub struct Slot<V> {
    cache: Cache<(), V>,
}

impl<V> Clone for Slot<V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<V> Default for Slot<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Slot<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Constructs a new, empty `Slot`. Use
    /// [`CacheBuilder::build_slot`][build-slot] to name it or to enable statistics.
    ///
    /// [build-slot]: ./struct.CacheBuilder.html#method.build_slot
    pub fn new() -> Self {
        Cache::<(), V>::builder().build_slot()
    }

    pub(crate) fn with_cache(cache: Cache<(), V>) -> Self {
        Self { cache }
    }

    /// Returns a _clone_ of the value, if it has been computed and not
    /// invalidated since.
    pub fn get(&self) -> Option<V> {
        self.cache.get(&())
    }

    /// Returns a _clone_ of the value, resolving `init` if it is missing. See
    /// [`Cache::get_with`][get-with].
    ///
    /// [get-with]: ./struct.Cache.html#method.get_with
    pub async fn get_with(&self, init: impl Future<Output = V>) -> V {
        self.cache.get_with((), init).await
    }

    /// Returns a _clone_ of the value, resolving `init` if it is missing. See
    /// [`Cache::try_get_with`][try-get-with].
    ///
    /// [try-get-with]: ./struct.Cache.html#method.try_get_with
    pub async fn try_get_with<F, E>(&self, init: F) -> Result<V, Arc<E>>
    where
        F: Future<Output = Result<V, E>>,
        E: Send + Sync + 'static,
    {
        self.cache.try_get_with((), init).await
    }

    /// Discards the value, including one being computed right now.
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    pub fn configure_override(&self, f: impl Fn(V) -> V + Send + Sync + 'static) {
        self.cache.configure_override(f);
    }

    pub fn generation(&self) -> u64 {
        self.cache.generation()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &Cache<(), V> {
        &self.cache
    }
}

impl<V> InvalidationHandler<()> for Slot<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn on_invalidation(&self, _signal: InvalidationSignal<()>) {
        // Both kinds of signal mean the same for a single value.
        self.invalidate();
    }
}
