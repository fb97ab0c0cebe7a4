use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::Arc;

/// A post-processing step applied to every freshly computed value before it is
/// published.
///
/// Overrides run inside the single-flight section of the computation, so each
/// of them runs exactly once per computation, in the order they were registered.
pub type Override<V> = Arc<dyn Fn(V) -> V + Send + Sync + 'static>;

pub(crate) struct Overrides<V> {
    chain: RwLock<SmallVec<[Override<V>; 4]>>,
}

impl<V> Overrides<V> {
    pub(crate) fn new(initial: Vec<Override<V>>) -> Self {
        Self {
            chain: RwLock::new(SmallVec::from_vec(initial)),
        }
    }

    pub(crate) fn push(&self, f: Override<V>) {
        self.chain.write().push(f);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.chain.read().len()
    }

    pub(crate) fn apply(&self, value: V) -> V {
        // Do not hold the lock while user code runs; an override might register
        // another override.
        let chain = self.chain.read().clone();
        chain.iter().fold(value, |v, f| f(v))
    }
}
