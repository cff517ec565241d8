//! Global reclaimer (C7): the high-watermark gate, the pressure-driven
//! shrinker, and the per-pool purge worker.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::log_warn;
use crate::pool::Pool;
use crate::registry::Registry;
use crate::types::{AllocError, Result};

/// Opaque handle to a scheduled timer job; dropping it does not cancel the
/// job, call [`cancel`](Self::cancel) explicitly.
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Prevent the scheduled job from running, if it has not fired yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Deferred-work collaborator the purge worker runs on.
///
/// Kept as a trait (rather than a hard dependency on `std::thread` or an
/// async runtime) so this crate stays executor-agnostic, matching the
/// library's own no-default-executor stance.
pub trait Timer: Send + Sync {
    /// Run `job` once, after `delay`, unless the returned handle is
    /// cancelled first.
    fn schedule_after(&self, delay: Duration, job: Box<dyn FnOnce() + Send>) -> TimerHandle;
}

/// Default [`Timer`]: a detached `std::thread` per job.
#[derive(Debug, Default)]
pub struct ThreadTimer;

impl Timer for ThreadTimer {
    fn schedule_after(&self, delay: Duration, job: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            if !flag.load(Ordering::Acquire) {
                job();
            }
        });
        TimerHandle { cancelled }
    }
}

/// High-watermark gate, shrinker, and purge sweep, all sharing
/// `total_pages` and a view of the [`Registry`] to walk for eviction
/// candidates.
pub struct Reclaimer {
    registry: Arc<Registry>,
    hi_wmk: usize,
    lo_wmk: usize,
    max_pages_per_pool: usize,
    shrink_age_min: Duration,
    total_pages: AtomicUsize,
    hiwmk_releases: AtomicU64,
    hiwmk_failures: AtomicU64,
}

impl Reclaimer {
    /// Construct a reclaimer bound to `registry`.
    pub fn new(registry: Arc<Registry>, hi_wmk: usize, lo_wmk: usize, max_pages_per_pool: usize, shrink_age_min: Duration) -> Self {
        Reclaimer {
            registry,
            hi_wmk,
            lo_wmk,
            max_pages_per_pool,
            shrink_age_min,
            total_pages: AtomicUsize::new(0),
            hiwmk_releases: AtomicU64::new(0),
            hiwmk_failures: AtomicU64::new(0),
        }
    }

    /// Pages currently resident, cached or handed out.
    pub fn total_pages(&self) -> usize {
        self.total_pages.load(Ordering::Acquire)
    }

    /// Configured high watermark.
    pub fn hi_wmk(&self) -> usize {
        self.hi_wmk
    }

    /// Configured low watermark.
    pub fn lo_wmk(&self) -> usize {
        self.lo_wmk
    }

    /// Number of times a shrink pass made room under watermark pressure.
    pub fn hiwmk_releases(&self) -> u64 {
        self.hiwmk_releases.load(Ordering::Relaxed)
    }

    /// Number of times the watermark gate rejected a request outright.
    pub fn hiwmk_failures(&self) -> u64 {
        self.hiwmk_failures.load(Ordering::Relaxed)
    }

    /// Reserve `n` fresh pages against `hi_wmk`, shrinking first if the
    /// projected total would breach it (C7a).
    pub fn reserve(&self, n: usize) -> Result<()> {
        loop {
            let current = self.total_pages.load(Ordering::Acquire);
            let proj = current + n;
            if proj <= self.hi_wmk {
                if self
                    .total_pages
                    .compare_exchange(current, proj, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Ok(());
                }
                continue;
            }

            self.shrink_with_age(proj - self.hi_wmk, Duration::ZERO);

            let after = self.total_pages.load(Ordering::Acquire);
            if after + n <= self.hi_wmk {
                if self
                    .total_pages
                    .compare_exchange(after, after + n, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.hiwmk_releases.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                continue;
            }

            self.hiwmk_failures.fetch_add(1, Ordering::Relaxed);
            log_warn!("watermark exceeded: requested {} pages, ceiling {} pages", n, self.hi_wmk);
            return Err(AllocError::WatermarkExceeded { requested: n, ceiling: self.hi_wmk });
        }
    }

    /// Account for pages that never went through [`reserve`](Self::reserve)
    /// being returned to a page source (purge, shrink, or a big free).
    pub fn release(&self, n: usize) {
        self.total_pages.fetch_sub(n, Ordering::AcqRel);
    }

    /// Shrinker (C7c). `nr == 0` is the query form: how many pages could be
    /// reclaimed right now without dropping below `lo_wmk`. `nr > 0` evicts
    /// up to `nr` pages, round-robin across registered pools, honouring
    /// `shrink_age_min` as the eviction age floor (pressure-driven path).
    pub fn shrink(&self, nr: usize) -> usize {
        self.shrink_with_age(nr, self.shrink_age_min)
    }

    /// Shared implementation behind [`shrink`](Self::shrink) and the
    /// watermark gate's own shrink attempt (§4.4 step 3), which must evict
    /// with `max_age = 0` rather than `shrink_age_min` - freshly released
    /// pages are fair game when admission is otherwise about to fail.
    fn shrink_with_age(&self, nr: usize, min_age: Duration) -> usize {
        if nr == 0 {
            let inactive: usize = self.registry.snapshot().iter().map(|p| p.inactive_pages()).sum();
            return inactive.saturating_sub(self.lo_wmk);
        }

        let pools = self.registry.snapshot();
        if pools.is_empty() {
            return 0;
        }

        let mut remaining = nr;
        let mut freed_total = 0usize;
        let mut idle_circuits = 0usize;

        while remaining > 0 && self.total_pages.load(Ordering::Acquire) > self.lo_wmk && idle_circuits < pools.len() {
            let idx = self.registry.advance_cursor() % pools.len();
            let freed = self.shrink_pool(&pools[idx], remaining, min_age);
            if freed == 0 {
                idle_circuits += 1;
            } else {
                idle_circuits = 0;
                freed_total += freed;
                remaining = remaining.saturating_sub(freed);
            }
        }

        freed_total
    }

    fn shrink_pool(&self, pool: &Arc<Pool>, nr_remaining: usize, min_age: Duration) -> usize {
        let mut freed = 0usize;
        while freed < nr_remaining && freed < self.max_pages_per_pool {
            match pool.evict_oldest(min_age) {
                Some(obj) => {
                    let pages = obj.pages_held();
                    pool.release_pages(obj);
                    self.total_pages.fetch_sub(pages, Ordering::AcqRel);
                    freed += pages;
                }
                None => break,
            }
        }
        freed
    }

    /// Purge sweep (C7b): evict every inactive object idle at least
    /// `purge_time_after`. Returns whether the pool still has inactive
    /// objects left (too young to purge yet), so the caller knows whether
    /// to reschedule.
    pub fn purge_pool(&self, pool: &Arc<Pool>, purge_time_after: Duration) -> bool {
        while let Some(obj) = pool.evict_oldest(purge_time_after) {
            let pages = obj.pages_held();
            pool.release_pages(obj);
            self.total_pages.fetch_sub(pages, Ordering::AcqRel);
        }
        !pool.is_inactive_empty()
    }
}

/// Bundles a [`Reclaimer`] with the [`Timer`] and intervals needed to keep
/// rescheduling a pool's purge worker without the pool holding a reference
/// back to the runtime.
pub struct ReclaimContext {
    /// The reclaimer this context drives the purge worker through.
    pub reclaimer: Reclaimer,
    /// Deferred-work collaborator backing the purge worker.
    pub timer: Box<dyn Timer>,
    /// Interval between purge sweeps.
    pub purge_interval: Duration,
    /// Minimum idle time before an object is purged.
    pub purge_time_after: Duration,
}

impl ReclaimContext {
    /// Schedule (or reschedule) a purge sweep for `pool` after
    /// `purge_interval`. Re-entrant: the job reschedules itself as long as
    /// the pool still has inactive objects too young to purge.
    pub fn schedule_purge(ctx: Arc<ReclaimContext>, pool: Arc<Pool>) {
        let ctx_job = ctx.clone();
        let pool_job = pool.clone();
        ctx.timer.schedule_after(
            ctx.purge_interval,
            Box::new(move || {
                let still_pending = ctx_job.reclaimer.purge_pool(&pool_job, ctx_job.purge_time_after);
                if still_pending {
                    ReclaimContext::schedule_purge(ctx_job, pool_job);
                } else {
                    pool_job.clear_purge_scheduled();
                }
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::Clustering;
    use crate::constants::PAGE_SIZE;
    use crate::page::{DefaultPageSource, PageSource};
    use crate::types::OwnerId;

    fn registry_with_pool(clustering: Clustering) -> (Arc<Registry>, Arc<Pool>) {
        let registry = Arc::new(Registry::new());
        let source: Arc<dyn PageSource> = Arc::new(DefaultPageSource::new());
        let pool = registry.lookup_or_create("t", clustering, false, OwnerId(1), source, 14, 3, 5).unwrap();
        (registry, pool)
    }

    #[test]
    fn reserve_within_watermark_succeeds_without_shrinking() {
        let (registry, _pool) = registry_with_pool(Clustering::None);
        let reclaimer = Reclaimer::new(registry, 100, 50, 50, Duration::from_secs(0));
        reclaimer.reserve(10).unwrap();
        assert_eq!(reclaimer.total_pages(), 10);
    }

    #[test]
    fn reserve_above_watermark_shrinks_then_fails_if_nothing_to_evict() {
        let (registry, _pool) = registry_with_pool(Clustering::None);
        let reclaimer = Reclaimer::new(registry, 10, 5, 50, Duration::from_secs(0));
        reclaimer.reserve(10).unwrap();
        let err = reclaimer.reserve(5).unwrap_err();
        assert!(matches!(err, AllocError::WatermarkExceeded { .. }));
        assert_eq!(reclaimer.hiwmk_failures(), 1);
    }

    #[test]
    fn shrink_query_form_reports_reclaimable_pages() {
        let (registry, pool) = registry_with_pool(Clustering::None);
        let reclaimer = Reclaimer::new(registry, 100, 2, 50, Duration::from_secs(0));
        let obj = pool.fill_bucketed(2, 4 * PAGE_SIZE).unwrap();
        reclaimer.reserve(4).unwrap();
        pool.release_bucketed(2, obj);
        assert_eq!(reclaimer.shrink(0), 2);
    }

    #[test]
    fn shrink_evicts_down_toward_the_low_watermark() {
        let (registry, pool) = registry_with_pool(Clustering::None);
        let reclaimer = Reclaimer::new(registry, 100, 0, 50, Duration::from_secs(0));
        let obj = pool.fill_bucketed(2, 4 * PAGE_SIZE).unwrap();
        reclaimer.reserve(4).unwrap();
        pool.release_bucketed(2, obj);
        let freed = reclaimer.shrink(4);
        assert_eq!(freed, 4);
        assert_eq!(pool.inactive_pages(), 0);
    }

    #[test]
    fn reserve_evicts_freshly_released_pages_regardless_of_shrink_age_min() {
        // shrink_age_min is an hour, so the pressure-driven shrink() path
        // would refuse to touch an object released moments ago. reserve()'s
        // own gate must still evict it (max_age = 0, per spec.md ssec4.4
        // step 3) rather than bouncing a request that cached pages could
        // satisfy.
        let (registry, pool) = registry_with_pool(Clustering::None);
        let reclaimer = Reclaimer::new(registry, 100, 50, 50, Duration::from_secs(3600));
        let obj = pool.fill_bucketed(2, 4 * PAGE_SIZE).unwrap();
        reclaimer.reserve(4).unwrap();
        pool.release_bucketed(2, obj);
        assert_eq!(reclaimer.total_pages(), 4);

        // Pushes total_pages to 100 (above hi_wmk=100? no - exactly at it is
        // fine); request one past it so the gate must shrink first.
        reclaimer.reserve(97).unwrap();
        assert_eq!(reclaimer.total_pages(), 101 - 4);
        assert_eq!(pool.inactive_pages(), 0);
        assert_eq!(reclaimer.hiwmk_releases(), 1);
    }

    #[test]
    fn purge_pool_evicts_only_entries_past_the_age_floor() {
        let (registry, pool) = registry_with_pool(Clustering::None);
        let reclaimer = Reclaimer::new(registry, 100, 0, 50, Duration::from_secs(0));
        let obj = pool.fill_bucketed(0, PAGE_SIZE).unwrap();
        reclaimer.reserve(1).unwrap();
        pool.release_bucketed(0, obj);
        let still_pending = reclaimer.purge_pool(&pool, Duration::from_secs(3600));
        assert!(still_pending);
        assert_eq!(pool.inactive_pages(), 1);

        let still_pending = reclaimer.purge_pool(&pool, Duration::from_secs(0));
        assert!(!still_pending);
        assert_eq!(pool.inactive_pages(), 0);
    }
}
