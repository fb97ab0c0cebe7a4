use super::{
    overrides::{Override, Overrides},
    store::{FlightId, Store},
};
use crate::{
    notification::{notifier::RemovalNotifier, InvalidationListener, RemovalCause},
    stats::{CacheStats, DefaultStatsCounter, DisabledStatsCounter, StatsCounter},
};

use std::{
    borrow::Borrow,
    hash::{BuildHasher, Hash},
    sync::Arc,
    time::Instant,
};

type StatsCounterBox = Box<dyn StatsCounter<Stats = CacheStats> + Send + Sync + 'static>;

/// Everything the `sync` and `future` caches have in common: the store, the
/// override chain, the statistics and the invalidation listener.
pub(crate) struct BaseCache<K, V, S> {
    pub(crate) inner: Arc<Inner<K, V, S>>,
}

impl<K, V, S> Clone for BaseCache<K, V, S> {
    /// Makes a clone of this shared cache.
    ///
    /// This operation is cheap as it only creates thread-safe reference counted
    /// pointers to the shared internal data structures.
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct Inner<K, V, S> {
    name: Option<String>,
    store: Store<K, V, S>,
    overrides: Overrides<V>,
    stats: StatsCounterBox,
    notifier: Option<RemovalNotifier<K, V>>,
}

pub(crate) struct BaseCacheConfig<K, V> {
    pub(crate) name: Option<String>,
    pub(crate) num_segments: usize,
    pub(crate) initial_capacity: Option<usize>,
    pub(crate) overrides: Vec<Override<V>>,
    pub(crate) invalidation_listener: Option<InvalidationListener<K, V>>,
    pub(crate) stats_enabled: bool,
}

impl<K, V> Default for BaseCacheConfig<K, V> {
    fn default() -> Self {
        Self {
            name: None,
            num_segments: super::DEFAULT_NUM_SEGMENTS,
            initial_capacity: None,
            overrides: Vec::new(),
            invalidation_listener: None,
            stats_enabled: false,
        }
    }
}

impl<K, V, S> BaseCache<K, V, S>
where
    K: Hash + Eq,
    V: Clone,
    S: BuildHasher + Clone,
{
    pub(crate) fn new(config: BaseCacheConfig<K, V>, build_hasher: S) -> Self {
        let stats: StatsCounterBox = if config.stats_enabled {
            Box::new(DefaultStatsCounter::default())
        } else {
            Box::new(DisabledStatsCounter)
        };
        let notifier = config
            .invalidation_listener
            .map(|listener| RemovalNotifier::new(listener, config.name.clone()));

        Self {
            inner: Arc::new(Inner {
                store: Store::new(config.num_segments, config.initial_capacity, build_hasher),
                overrides: Overrides::new(config.overrides),
                stats,
                notifier,
                name: config.name,
            }),
        }
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    #[inline]
    pub(crate) fn hash<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        self.inner.store.hash(key)
    }

    /// The lookup every read goes through first. Records a hit or a miss.
    pub(crate) fn get_with_hash<Q>(&self, key: &Q, hash: u64) -> Option<V>
    where
        Arc<K>: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let maybe_value = self.inner.store.get(key, hash);
        if maybe_value.is_some() {
            self.inner.stats.record_hits(1);
        } else {
            self.inner.stats.record_misses(1);
        }
        maybe_value
    }

    /// The double-check done by the caller that won the right to compute. Does
    /// not record statistics, as the miss has already been recorded.
    pub(crate) fn get_or_begin(&self, key: &Arc<K>, hash: u64) -> Result<V, FlightId> {
        self.inner.store.get_or_begin(key, hash)
    }

    pub(crate) fn abandon(&self, key: &Arc<K>, hash: u64, flight: FlightId) {
        self.inner.store.abandon(key, hash, flight);
    }

    pub(crate) fn contains_key<Q>(&self, key: &Q) -> bool
    where
        Arc<K>: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.store.contains_key(key, self.hash(key))
    }

    pub(crate) fn apply_overrides(&self, value: V) -> V {
        self.inner.overrides.apply(value)
    }

    pub(crate) fn push_override(&self, f: Override<V>) {
        self.inner.overrides.push(f);
    }

    /// Publishes a computed value, unless the key was invalidated after its
    /// flight began.
    pub(crate) fn publish(&self, key: Arc<K>, hash: u64, value: V, flight: FlightId) -> bool {
        let published = self.inner.store.publish(key, hash, value, flight);
        if !published {
            self.inner.stats.record_stale_load();
            #[cfg(feature = "logging")]
            log::debug!(
                "{}Discarded a value computed during an invalidation",
                super::name_prefix(self.name())
            );
        }
        published
    }

    pub(crate) fn record_load_success(&self, started: Instant) {
        self.inner
            .stats
            .record_load_success(elapsed_nanos(started));
    }

    pub(crate) fn record_load_failure(&self, started: Instant) {
        self.inner
            .stats
            .record_load_failure(elapsed_nanos(started));
        #[cfg(feature = "logging")]
        log::debug!(
            "{}Failed to compute a value; nothing was cached",
            super::name_prefix(self.name())
        );
    }

    pub(crate) fn invalidate<Q>(&self, key: &Q, cause: RemovalCause)
    where
        Arc<K>: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash(key);
        if let Some(entry) = self.inner.store.remove(key, hash) {
            self.inner.stats.record_invalidations(1);
            self.notify(entry.key(), entry.value(), cause);
        }
    }

    pub(crate) fn invalidate_all(&self, cause: RemovalCause) {
        let removed = self.inner.store.clear();

        #[cfg(feature = "logging")]
        log::trace!(
            "{}Invalidated all {} entries ({cause:?})",
            super::name_prefix(self.name()),
            removed.len()
        );

        if removed.is_empty() {
            return;
        }
        self.inner
            .stats
            .record_invalidations(removed.len().try_into().unwrap_or(u32::MAX));
        for entry in removed {
            self.notify(entry.key(), entry.value(), cause);
        }
    }

    pub(crate) fn entry_count(&self) -> u64 {
        self.inner.store.len() as u64
    }

    pub(crate) fn generation(&self) -> u64 {
        self.inner.store.generation()
    }

    pub(crate) fn num_segments(&self) -> usize {
        self.inner.store.num_segments()
    }

    pub(crate) fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    fn notify(&self, key: &Arc<K>, value: &V, cause: RemovalCause) {
        if let Some(notifier) = &self.inner.notifier {
            notifier.notify(Arc::clone(key), value.clone(), cause);
        }
    }
}

fn elapsed_nanos(started: Instant) -> u64 {
    started.elapsed().as_nanos().try_into().unwrap_or(u64::MAX)
}
