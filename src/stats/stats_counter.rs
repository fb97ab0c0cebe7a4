use super::CacheStats;

use crossbeam_utils::atomic::AtomicCell;

pub fn saturating_add(counter: &AtomicCell<u64>, value: u64) {
    let mut v0 = counter.load();
    loop {
        let v1 = v0.saturating_add(value);
        match counter.compare_exchange(v0, v1) {
            Ok(_) => break,
            Err(v2) => v0 = v2,
        }
    }
}

pub trait StatsCounter {
    type Stats;

    #[allow(unused_variables)]
    fn record_hits(&self, count: u32) {}

    #[allow(unused_variables)]
    fn record_misses(&self, count: u32) {}

    #[allow(unused_variables)]
    fn record_load_success(&self, load_time_nanos: u64) {}

    #[allow(unused_variables)]
    fn record_load_failure(&self, load_time_nanos: u64) {}

    fn record_stale_load(&self) {}

    #[allow(unused_variables)]
    fn record_invalidations(&self, count: u32) {}

    fn snapshot(&self) -> Self::Stats;
}

/// A `StatsCounter` that does not record any cache events.
#[derive(Default)]
pub struct DisabledStatsCounter;

impl StatsCounter for DisabledStatsCounter {
    type Stats = CacheStats;

    fn snapshot(&self) -> Self::Stats {
        // Return a `CacheStats` with all fields set to 0.
        CacheStats::default()
    }
}

#[derive(Default)]
pub struct DefaultStatsCounter {
    hit_count: AtomicCell<u64>,
    miss_count: AtomicCell<u64>,
    load_success_count: AtomicCell<u64>,
    load_failure_count: AtomicCell<u64>,
    total_load_time: AtomicCell<u64>,
    stale_load_count: AtomicCell<u64>,
    invalidation_count: AtomicCell<u64>,
}

impl StatsCounter for DefaultStatsCounter {
    type Stats = CacheStats;

    fn record_hits(&self, count: u32) {
        saturating_add(&self.hit_count, count as u64);
    }

    fn record_misses(&self, count: u32) {
        saturating_add(&self.miss_count, count as u64);
    }

    fn record_load_success(&self, load_time_nanos: u64) {
        saturating_add(&self.load_success_count, 1);
        saturating_add(&self.total_load_time, load_time_nanos);
    }

    fn record_load_failure(&self, load_time_nanos: u64) {
        saturating_add(&self.load_failure_count, 1);
        saturating_add(&self.total_load_time, load_time_nanos);
    }

    fn record_stale_load(&self) {
        saturating_add(&self.stale_load_count, 1);
    }

    fn record_invalidations(&self, count: u32) {
        saturating_add(&self.invalidation_count, count as u64);
    }

    fn snapshot(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        stats
            .set_req_counts(self.hit_count.load(), self.miss_count.load())
            .set_load_counts(
                self.load_success_count.load(),
                self.load_failure_count.load(),
                self.total_load_time.load(),
            )
            .set_stale_load_count(self.stale_load_count.load())
            .set_invalidation_count(self.invalidation_count.load());
        stats
    }
}
