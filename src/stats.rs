//! Cache statistics.

mod stats_counter;

pub use stats_counter::{DefaultStatsCounter, DisabledStatsCounter, StatsCounter};

/// Statistics about the performance of a cache.
///
/// Cache statistics are incremented according to the following rules:
///
/// - When a lookup finds a published value, `hit_count` is incremented.
/// - When a lookup finds no published value, `miss_count` is incremented.
///    - If the lookup was made by a `get_with` family method, the caller either
///      computes the value or joins a computation already in flight:
///        - After the caller successfully computed a value, `load_success_count`
///          is incremented and the computation time, in nanoseconds, is added to
///          `total_load_time_nanos`.
///        - After the caller failed to compute a value, `load_failure_count` is
///          incremented and the computation time is added to
///          `total_load_time_nanos`.
///        - Callers that joined another caller's computation do _not_ modify the
///          load counts.
///    - If a computed value could not be published because its key was
///      invalidated while it was being computed, `stale_load_count` is
///      incremented.
/// - Every entry removed by an invalidation increments `invalidation_count`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    hit_count: u64,
    miss_count: u64,
    load_success_count: u64,
    load_failure_count: u64,
    total_load_time_nanos: u64,
    stale_load_count: u64,
    invalidation_count: u64,
}

impl CacheStats {
    pub fn set_req_counts(&mut self, hit_count: u64, miss_count: u64) -> &mut Self {
        self.hit_count = hit_count;
        self.miss_count = miss_count;
        self
    }

    pub fn set_load_counts(
        &mut self,
        load_success_count: u64,
        load_failure_count: u64,
        total_load_time_nanos: u64,
    ) -> &mut Self {
        self.load_success_count = load_success_count;
        self.load_failure_count = load_failure_count;
        self.total_load_time_nanos = total_load_time_nanos;
        self
    }

    pub fn set_stale_load_count(&mut self, count: u64) -> &mut Self {
        self.stale_load_count = count;
        self
    }

    pub fn set_invalidation_count(&mut self, count: u64) -> &mut Self {
        self.invalidation_count = count;
        self
    }

    pub fn request_count(&self) -> u64 {
        self.hit_count.saturating_add(self.miss_count)
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    pub fn hit_rate(&self) -> f64 {
        let req_count = self.request_count();
        if req_count == 0 {
            1.0
        } else {
            self.hit_count as f64 / req_count as f64
        }
    }

    pub fn miss_count(&self) -> u64 {
        self.miss_count
    }

    pub fn miss_rate(&self) -> f64 {
        let req_count = self.request_count();
        if req_count == 0 {
            0.0
        } else {
            self.miss_count as f64 / req_count as f64
        }
    }

    pub fn load_count(&self) -> u64 {
        self.load_success_count
            .saturating_add(self.load_failure_count)
    }

    pub fn load_success_count(&self) -> u64 {
        self.load_success_count
    }

    pub fn load_failure_count(&self) -> u64 {
        self.load_failure_count
    }

    pub fn load_failure_rate(&self) -> f64 {
        let load_count = self.load_count();
        if load_count == 0 {
            0.0
        } else {
            self.load_failure_count as f64 / load_count as f64
        }
    }

    pub fn total_load_time_nanos(&self) -> u64 {
        self.total_load_time_nanos
    }

    pub fn average_load_penalty_nanos(&self) -> f64 {
        let load_count = self.load_count();
        if load_count == 0 {
            0.0
        } else {
            self.total_load_time_nanos as f64 / load_count as f64
        }
    }

    /// The number of computed values that were handed to their callers but not
    /// retained, because their key was invalidated during the computation.
    pub fn stale_load_count(&self) -> u64 {
        self.stale_load_count
    }

    pub fn invalidation_count(&self) -> u64 {
        self.invalidation_count
    }
}
