//! Statistics report renderer (C13): a read-only snapshot of every pool's
//! counters plus the reclaimer's global header fields, formatted as the
//! fixed-width table the original `/proc` reader produced.

use std::fmt;

use crate::pool::BucketStats;
use crate::reclaim::Reclaimer;
use crate::registry::Registry;

/// One pool's row plus its per-bucket and big-object breakdown.
#[derive(Debug, Clone)]
pub struct PoolReport {
    /// Pool name.
    pub name: String,
    /// Per-bucket counters, in ascending order.
    pub buckets: Vec<BucketStats>,
    /// `(big_alloc, big_merged, big_pages)` lifetime counters.
    pub big: (u64, u64, u64),
    /// Pages currently sitting in this pool's inactive LRU.
    pub inactive_pages: usize,
}

impl PoolReport {
    /// Total acquires served (hit or miss) across every bucket.
    pub fn total(&self) -> u64 {
        self.buckets.iter().map(|b| b.total).sum()
    }

    /// Total cache hits served across every bucket.
    pub fn hits(&self) -> u64 {
        self.buckets.iter().map(|b| b.hit).sum()
    }

    /// Hit rate as a percentage, `0.0` if this pool has never been touched.
    pub fn hit_pct(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            100.0 * self.hits() as f64 / total as f64
        }
    }

    /// Merge rate as a percentage of total acquires, bucketed plus big.
    pub fn merged_pct(&self) -> f64 {
        let total = self.total() + self.big.0;
        if total == 0 {
            0.0
        } else {
            100.0 * (self.buckets.iter().map(|b| b.merged).sum::<u64>() + self.big.1) as f64 / total as f64
        }
    }

    /// Cached entries currently held across every bucket.
    pub fn cached_entries(&self) -> usize {
        self.buckets.iter().map(|b| b.cached_entries).sum()
    }
}

/// Snapshot of every registered pool's counters plus the reclaimer's global
/// header fields (`AllocatorRuntime::report`).
#[derive(Debug, Clone)]
pub struct StatsReport {
    /// Pages currently resident (cached or handed out).
    pub total_pages: usize,
    /// Configured high watermark, in pages.
    pub hi_wmk: usize,
    /// Configured low watermark, in pages.
    pub lo_wmk: usize,
    /// Number of times a shrink pass made room under watermark pressure.
    pub hiwmk_releases: u64,
    /// Number of times the watermark gate rejected a request outright.
    pub hiwmk_failures: u64,
    /// Per-pool rows, in registration order.
    pub pools: Vec<PoolReport>,
    /// Allocation count for the non-cached (`scst_alloc`) path.
    pub other_alloc: u64,
    /// Merge count for the non-cached path.
    pub other_merged: u64,
    /// Pages currently held by the non-cached path.
    pub other_pages: u64,
}

impl StatsReport {
    /// Collect a snapshot from `registry` and `reclaimer`, under no lock
    /// beyond each component's own (no global `report` lock is needed since
    /// every field read here is already atomic or its own short-lived guard).
    pub fn collect(registry: &Registry, reclaimer: &Reclaimer, other_alloc: u64, other_merged: u64, other_pages: u64) -> StatsReport {
        let pools = registry
            .snapshot()
            .iter()
            .map(|pool| PoolReport {
                name: pool.name.clone(),
                buckets: pool.bucket_stats(),
                big: pool.big_stats(),
                inactive_pages: pool.inactive_pages(),
            })
            .collect();

        StatsReport {
            total_pages: reclaimer.total_pages(),
            hi_wmk: reclaimer.hi_wmk(),
            lo_wmk: reclaimer.lo_wmk(),
            hiwmk_releases: reclaimer.hiwmk_releases(),
            hiwmk_failures: reclaimer.hiwmk_failures(),
            pools,
            other_alloc,
            other_merged,
            other_pages,
        }
    }

    /// Total pages cached across every pool's inactive LRU.
    pub fn inactive_pages(&self) -> usize {
        self.pools.iter().map(|p| p.inactive_pages).sum()
    }

    /// Pages resident but not sitting idle in a cache.
    pub fn active_pages(&self) -> usize {
        self.total_pages.saturating_sub(self.inactive_pages())
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "sgv_mem: active={} inactive={} hi_wmk={} lo_wmk={} hiwmk_releases={} hiwmk_failures={}",
            self.active_pages(),
            self.inactive_pages(),
            self.hi_wmk,
            self.lo_wmk,
            self.hiwmk_releases,
            self.hiwmk_failures,
        )?;

        for pool in &self.pools {
            writeln!(
                f,
                "  {:<16} hit={:>6} total={:>6} merged={:>5.1}% cached={:>5} inactive_pages={:>6}",
                pool.name,
                pool.hits(),
                pool.total(),
                pool.hit_pct(),
                pool.cached_entries(),
                pool.inactive_pages,
            )?;

            for bucket in &pool.buckets {
                if bucket.total == 0 {
                    continue;
                }
                writeln!(
                    f,
                    "    order={:<2} hit={:>6} total={:>6} merged={:>4} cached_entries={:>5} cached_pages={:>6}",
                    bucket.order, bucket.hit, bucket.total, bucket.merged, bucket.cached_entries, bucket.cached_pages,
                )?;
            }

            let (big_alloc, big_merged, big_pages) = pool.big;
            writeln!(f, "    big/other alloc={:>6} merged={:>4} pages={:>6}", big_alloc, big_merged, big_pages)?;
        }

        writeln!(f, "  other (scst_alloc) alloc={} merged={} pages={}", self.other_alloc, self.other_merged, self.other_pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::Clustering;
    use crate::constants::PAGE_SIZE;
    use crate::page::{DefaultPageSource, PageSource};
    use crate::reclaim::Reclaimer;
    use crate::types::OwnerId;
    use std::sync::Arc;
    use std::time::Duration;

    fn source() -> Arc<dyn PageSource> {
        Arc::new(DefaultPageSource::new())
    }

    #[test]
    fn collect_reflects_pool_activity() {
        let registry = Arc::new(Registry::new());
        let pool = registry.lookup_or_create("t", Clustering::None, false, OwnerId(1), source(), 14, 3, 5).unwrap();
        let obj = pool.fill_bucketed(0, PAGE_SIZE).unwrap();
        pool.release_bucketed(0, obj);
        let reclaimer = Reclaimer::new(registry.clone(), 100, 0, 50, Duration::from_secs(0));
        reclaimer.reserve(1).unwrap();

        let report = StatsReport::collect(&registry, &reclaimer, 0, 0, 0);
        assert_eq!(report.pools.len(), 1);
        assert_eq!(report.pools[0].total(), 1);
        assert_eq!(report.inactive_pages(), 1);
        assert_eq!(report.active_pages(), 0);
    }

    #[test]
    fn display_does_not_panic_on_an_empty_registry() {
        let registry = Arc::new(Registry::new());
        let reclaimer = Reclaimer::new(registry.clone(), 100, 0, 50, Duration::from_secs(0));
        let report = StatsReport::collect(&registry, &reclaimer, 2, 1, 3);
        let text = format!("{}", report);
        assert!(text.contains("hi_wmk=100"));
        assert!(text.contains("other (scst_alloc) alloc=2"));
    }
}
