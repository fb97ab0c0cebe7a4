use std::sync::Arc;

/// A published value together with its key.
///
/// Entries are never mutated after they have been published. The store swaps in
/// a whole new entry (or removes it), so a reader holding one never observes a
/// partially written value.
pub(crate) struct CacheEntry<K, V> {
    key: Arc<K>,
    value: V,
}

impl<K, V> CacheEntry<K, V> {
    pub(crate) fn new(key: Arc<K>, value: V) -> Self {
        Self { key, value }
    }

    pub(crate) fn key(&self) -> &Arc<K> {
        &self.key
    }

    pub(crate) fn value(&self) -> &V {
        &self.value
    }
}
