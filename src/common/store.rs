use super::entry::CacheEntry;

use crossbeam_utils::{atomic::AtomicCell, CachePadded};
use parking_lot::RwLock;
use std::{
    borrow::Borrow,
    collections::HashMap,
    hash::{BuildHasher, Hash, Hasher},
    sync::Arc,
};
use triomphe::Arc as TrioArc;

type EntryMap<K, V, S> = HashMap<Arc<K>, TrioArc<CacheEntry<K, V>>, S>;
type FlightMap<K, S> = HashMap<Arc<K>, u64, S>;

/// Identifies a computation that is allowed to publish a value for its key.
///
/// A flight is registered by [`Store::get_or_begin`] and unregistered by an
/// invalidation of its key (or of all keys), by the publish, or by
/// [`Store::abandon`]. Only a computation whose flight is still registered may
/// publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FlightId(u64);

struct Segment<K, V, S> {
    entries: EntryMap<K, V, S>,
    flights: FlightMap<K, S>,
}

/// A hash map split into a power-of-two number of independently locked
/// segments.
///
/// Reads take the segment's read lock only for as long as it takes to clone the
/// value out. Registering a flight, publishing and invalidating take the write
/// lock. Flights are tracked per key, so invalidating one key never discards a
/// computation of another key.
pub(crate) struct Store<K, V, S> {
    segments: Box<[RwLock<Segment<K, V, S>>]>,
    build_hasher: S,
    segment_mask: usize,
    next_flight: AtomicCell<u64>,
    // AtomicCell falls back to a lock on platforms without 64-bit atomics.
    generation: CachePadded<AtomicCell<u64>>,
}

impl<K, V, S> Store<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Clone,
{
    pub(crate) fn new(
        num_segments: usize,
        initial_capacity: Option<usize>,
        build_hasher: S,
    ) -> Self {
        super::ensure_num_segments_or_panic(num_segments);

        let seg_capacity = initial_capacity
            .map(|cap| (cap + num_segments - 1) / num_segments)
            .unwrap_or_default();

        let segments = (0..num_segments)
            .map(|_| {
                RwLock::new(Segment {
                    entries: HashMap::with_capacity_and_hasher(seg_capacity, build_hasher.clone()),
                    flights: HashMap::with_hasher(build_hasher.clone()),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            segments,
            build_hasher,
            segment_mask: num_segments - 1,
            next_flight: AtomicCell::new(0),
            generation: CachePadded::new(AtomicCell::new(0)),
        }
    }

    #[inline]
    pub(crate) fn hash<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        let mut hasher = self.build_hasher.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[inline]
    fn segment(&self, hash: u64) -> &RwLock<Segment<K, V, S>> {
        &self.segments[(hash as usize) & self.segment_mask]
    }

    pub(crate) fn get<Q>(&self, key: &Q, hash: u64) -> Option<V>
    where
        Arc<K>: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.segment(hash)
            .read()
            .entries
            .get(key)
            .map(|entry| entry.value().clone())
    }

    pub(crate) fn contains_key<Q>(&self, key: &Q, hash: u64) -> bool
    where
        Arc<K>: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.segment(hash).read().entries.contains_key(key)
    }

    /// Returns the published value for the key, or registers a flight for it.
    ///
    /// If a flight is already registered for the key (a computation with a
    /// different error type is running), its ID is shared, and whichever of the
    /// two computations publishes first wins.
    pub(crate) fn get_or_begin(&self, key: &Arc<K>, hash: u64) -> Result<V, FlightId>
    where
        V: Clone,
    {
        let mut segment = self.segment(hash).write();
        if let Some(entry) = segment.entries.get(key) {
            return Ok(entry.value().clone());
        }
        if let Some(id) = segment.flights.get(key) {
            return Err(FlightId(*id));
        }
        let id = self.next_flight.fetch_add(1);
        segment.flights.insert(Arc::clone(key), id);
        Err(FlightId(id))
    }

    /// Publishes the value if the flight is still registered for the key.
    /// Returns `true` if the value was published.
    pub(crate) fn publish(&self, key: Arc<K>, hash: u64, value: V, flight: FlightId) -> bool {
        let mut segment = self.segment(hash).write();
        if segment.flights.get(&key) != Some(&flight.0) {
            return false;
        }
        segment.flights.remove(&key);
        let entry = TrioArc::new(CacheEntry::new(Arc::clone(&key), value));
        segment.entries.insert(key, entry);
        true
    }

    /// Unregisters the flight of a computation that failed or was dropped.
    pub(crate) fn abandon(&self, key: &Arc<K>, hash: u64, flight: FlightId) {
        let mut segment = self.segment(hash).write();
        if segment.flights.get(key) == Some(&flight.0) {
            segment.flights.remove(key);
        }
    }

    /// Removes the entry for the key and unregisters its flight, so that a
    /// computation in flight for it will not publish.
    pub(crate) fn remove<Q>(&self, key: &Q, hash: u64) -> Option<TrioArc<CacheEntry<K, V>>>
    where
        Arc<K>: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut segment = self.segment(hash).write();
        self.generation.fetch_add(1);
        segment.flights.remove(key);
        segment.entries.remove(key)
    }

    /// Removes every entry and unregisters every flight.
    pub(crate) fn clear(&self) -> Vec<TrioArc<CacheEntry<K, V>>> {
        self.generation.fetch_add(1);
        let mut removed = Vec::new();
        for segment in self.segments.iter() {
            let mut segment = segment.write();
            segment.flights.clear();
            removed.extend(segment.entries.drain().map(|(_k, entry)| entry));
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.segments.iter().map(|s| s.read().entries.len()).sum()
    }

    /// The number of invalidations this store has seen.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load()
    }

    pub(crate) fn num_segments(&self) -> usize {
        self.segments.len()
    }
}
