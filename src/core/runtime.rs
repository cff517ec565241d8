//! `AllocatorRuntime` (REDESIGN FLAGS, §9): encapsulates every global
//! mutable the original kept as file-scope statics - the registry, the
//! watermark/shrinker state, the round-robin cursor, and the non-cached
//! (`scst_alloc`) path's counters - behind one value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::clustering::Clustering;
use crate::constants::PAGE_SIZE;
use crate::core::config::AllocatorConfig;
use crate::{log_debug, log_info};
use crate::handle::{Origin, SgHandle};
use crate::page::{DefaultPageSource, PageSource};
use crate::pool::Pool;
use crate::quota::MemLim;
use crate::reclaim::{ReclaimContext, Reclaimer, ThreadTimer};
use crate::registry::Registry;
use crate::sg::{PrivData, SgObject, SgSize};
use crate::stats::StatsReport;
use crate::types::{AllocError, AllocFlags, OwnerId, Result};

/// Name of the eager non-clustering preset pool.
pub const NORM_POOL: &str = "norm";
/// Name of the eager full-clustering preset pool.
pub const NORM_CLUST_POOL: &str = "norm-clust";
/// Name of the eager DMA-oriented preset pool.
pub const DMA_POOL: &str = "dma";

const PRESET_OWNER: OwnerId = OwnerId(0);

fn pages_for(size_bytes: usize) -> usize {
    (size_bytes + PAGE_SIZE - 1) / PAGE_SIZE
}

/// The allocator's single piece of global state: configuration, the pool
/// registry, the reclaimer, and the counters for the non-cached path.
pub struct AllocatorRuntime {
    config: AllocatorConfig,
    registry: Arc<Registry>,
    reclaim: Arc<ReclaimContext>,
    default_source: Arc<dyn PageSource>,
    norm_pool: Arc<Pool>,
    norm_clust_pool: Arc<Pool>,
    dma_pool: Arc<Pool>,
    other_alloc: AtomicU64,
    other_merged: AtomicU64,
    other_pages: AtomicU64,
}

impl AllocatorRuntime {
    /// Build a runtime from `config`, eagerly creating the three preset
    /// pools (C12).
    pub fn new(config: AllocatorConfig) -> Arc<Self> {
        let registry = Arc::new(Registry::new());
        let default_source: Arc<dyn PageSource> = Arc::new(DefaultPageSource::new());
        let reclaim = Arc::new(ReclaimContext {
            reclaimer: Reclaimer::new(registry.clone(), config.hi_wmk, config.lo_wmk, config.max_pages_per_pool, config.shrink_age_min),
            timer: Box::new(ThreadTimer),
            purge_interval: config.purge_interval,
            purge_time_after: config.purge_time_after,
        });

        let norm_pool = registry
            .lookup_or_create(NORM_POOL, Clustering::None, false, PRESET_OWNER, default_source.clone(), config.order_max, config.local_order, config.trans_order)
            .expect("preset pool name is reserved");
        let norm_clust_pool = registry
            .lookup_or_create(NORM_CLUST_POOL, Clustering::Full, false, PRESET_OWNER, default_source.clone(), config.order_max, config.local_order, config.trans_order)
            .expect("preset pool name is reserved");
        let dma_pool = registry
            .lookup_or_create(DMA_POOL, Clustering::None, false, PRESET_OWNER, default_source.clone(), config.order_max, config.local_order, config.trans_order)
            .expect("preset pool name is reserved");

        log_info!("allocator runtime started: hi_wmk={} lo_wmk={} order_max={}", config.hi_wmk, config.lo_wmk, config.order_max);

        Arc::new(AllocatorRuntime {
            config,
            registry,
            reclaim,
            default_source,
            norm_pool,
            norm_clust_pool,
            dma_pool,
            other_alloc: AtomicU64::new(0),
            other_merged: AtomicU64::new(0),
            other_pages: AtomicU64::new(0),
        })
    }

    /// The eager, non-clustering preset pool.
    pub fn norm_pool(&self) -> Arc<Pool> {
        self.norm_pool.clone()
    }

    /// The eager, full-clustering preset pool.
    pub fn norm_clust_pool(&self) -> Arc<Pool> {
        self.norm_clust_pool.clone()
    }

    /// The eager DMA-oriented preset pool. Bind it to a bounded-region
    /// source with [`set_allocator`](Self::set_allocator) before relying on
    /// its pages actually living in a constrained region.
    pub fn dma_pool(&self) -> Arc<Pool> {
        self.dma_pool.clone()
    }

    /// Tunables this runtime was constructed with.
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Create, or join as a shared consumer, a named pool (`pool_create`).
    pub fn pool_create(&self, name: &str, clustering: Clustering, shared: bool, owner: OwnerId) -> Result<Arc<Pool>> {
        let pool = self.registry.lookup_or_create(
            name,
            clustering,
            shared,
            owner,
            self.default_source.clone(),
            self.config.order_max,
            self.config.local_order,
            self.config.trans_order,
        )?;
        log_debug!("pool_create: {} (clustering={:?}, shared={})", name, clustering, shared);
        Ok(pool)
    }

    /// Drop a logical reference to `pool`; once the last reference drops,
    /// flush its cache and free its pages (`pool_destroy`).
    pub fn pool_destroy(&self, pool: Arc<Pool>) {
        if let Some(pool) = self.registry.destroy(&pool) {
            let freed = pool.flush();
            self.reclaim.reclaimer.release(freed);
            log_debug!("pool_destroy: {} (freed {} cached pages)", pool.name, freed);
        }
    }

    /// Destroy every cached object in `pool` without removing it from the
    /// registry (`pool_flush`).
    pub fn pool_flush(&self, pool: &Arc<Pool>) {
        let freed = pool.flush();
        self.reclaim.reclaimer.release(freed);
    }

    /// Rebind `pool`'s page source (`set_allocator`).
    pub fn set_allocator(&self, pool: &Arc<Pool>, source: Arc<dyn PageSource>) {
        pool.set_source(source);
    }

    /// Acquire an SG object from `pool`, charging `quota` for any freshly
    /// allocated pages (`alloc`).
    pub fn alloc(&self, pool: &Arc<Pool>, size_bytes: usize, flags: AllocFlags, quota: &MemLim, priv_data: Option<PrivData>) -> Result<SgHandle> {
        if size_bytes == 0 {
            let shell = SgObject::shell(SgSize::Bucketed(0), self.config.local_order, self.config.trans_order);
            return Ok(SgHandle { object: shell, origin: Origin::Unowned });
        }

        let pages = pages_for(size_bytes);
        let order = if flags.contains(AllocFlags::NO_CACHED) { None } else { pool.order_for(pages) };

        match order {
            Some(order) => self.alloc_bucketed(pool, order, size_bytes, flags, quota, priv_data),
            None => self.alloc_big(pool, pages, size_bytes, flags, quota, priv_data),
        }
    }

    fn alloc_bucketed(&self, pool: &Arc<Pool>, order: u8, size_bytes: usize, flags: AllocFlags, quota: &MemLim, priv_data: Option<PrivData>) -> Result<SgHandle> {
        if let Some(mut obj) = pool.try_acquire_cached(order, size_bytes) {
            if let Err(e) = quota.try_charge(1usize << order) {
                if pool.release_bucketed(order, obj) {
                    ReclaimContext::schedule_purge(self.reclaim.clone(), pool.clone());
                }
                return Err(e);
            }
            if let Some(p) = priv_data {
                obj.set_priv_if_absent(p);
            }
            return Ok(SgHandle { object: obj, origin: Origin::Bucketed { pool: pool.clone(), order } });
        }

        pool.record_miss(order);

        if flags.contains(AllocFlags::NO_ALLOC_ON_CACHE_MISS) {
            let shell = pool.shell(order);
            return Ok(SgHandle { object: shell, origin: Origin::Bucketed { pool: pool.clone(), order } });
        }

        let bucket_pages = 1usize << order;
        quota.try_charge(bucket_pages)?;
        if let Err(e) = self.reclaim.reclaimer.reserve(bucket_pages) {
            quota.uncharge(bucket_pages);
            return Err(e);
        }

        match pool.fill_bucketed(order, size_bytes) {
            Ok(mut obj) => {
                if let Some(p) = priv_data {
                    obj.set_priv_if_absent(p);
                }
                Ok(SgHandle { object: obj, origin: Origin::Bucketed { pool: pool.clone(), order } })
            }
            Err((obj, filled)) => {
                let unused = bucket_pages - filled;
                quota.uncharge(unused);
                self.reclaim.reclaimer.release(unused);
                if flags.contains(AllocFlags::RETURN_OBJ_ON_ALLOC_FAIL) {
                    Ok(SgHandle { object: obj, origin: Origin::Bucketed { pool: pool.clone(), order } })
                } else {
                    quota.uncharge(filled);
                    self.reclaim.reclaimer.release(filled);
                    pool.release_pages(obj);
                    Err(AllocError::OutOfMemory)
                }
            }
        }
    }

    fn alloc_big(&self, pool: &Arc<Pool>, pages: usize, size_bytes: usize, flags: AllocFlags, quota: &MemLim, priv_data: Option<PrivData>) -> Result<SgHandle> {
        quota.try_charge(pages)?;
        if let Err(e) = self.reclaim.reclaimer.reserve(pages) {
            quota.uncharge(pages);
            return Err(e);
        }

        match pool.fill_big(pages as u32, size_bytes) {
            Ok(mut obj) => {
                if let Some(p) = priv_data {
                    obj.set_priv_if_absent(p);
                }
                Ok(SgHandle { object: obj, origin: Origin::PoolBig { pool: pool.clone() } })
            }
            Err((obj, filled)) => {
                let unused = pages - filled;
                quota.uncharge(unused);
                self.reclaim.reclaimer.release(unused);
                if flags.contains(AllocFlags::RETURN_OBJ_ON_ALLOC_FAIL) {
                    Ok(SgHandle { object: obj, origin: Origin::PoolBig { pool: pool.clone() } })
                } else {
                    quota.uncharge(filled);
                    self.reclaim.reclaimer.release(filled);
                    pool.release_pages(obj);
                    Err(AllocError::OutOfMemory)
                }
            }
        }
    }

    /// Release a handle acquired through [`alloc`](Self::alloc).
    pub fn free(&self, handle: SgHandle, quota: &MemLim) {
        let SgHandle { object, origin } = handle;
        let pages = object.pages_held();
        match origin {
            Origin::Bucketed { pool, order } => {
                quota.uncharge(pages);
                // A `NO_ALLOC_ON_CACHE_MISS` shell holds no pages and built no
                // entries; re-banking it would let the next cache hit hand out
                // a bogus zero-page object instead of filling a real miss.
                if pages > 0 {
                    if pool.release_bucketed(order, object) {
                        ReclaimContext::schedule_purge(self.reclaim.clone(), pool);
                    }
                }
            }
            Origin::PoolBig { pool } => {
                quota.uncharge(pages);
                self.reclaim.reclaimer.release(pages);
                pool.release_pages(object);
            }
            Origin::Unowned => {}
        }
    }

    /// Build an SG object outside any pool, with no clustering and no
    /// quota charge (`scst_alloc`).
    pub fn scst_alloc(&self, size_bytes: usize, flags: AllocFlags) -> Result<SgHandle> {
        if size_bytes == 0 {
            let shell = SgObject::shell(SgSize::Big(0), self.config.local_order, self.config.trans_order);
            return Ok(SgHandle { object: shell, origin: Origin::Unowned });
        }

        let pages = pages_for(size_bytes);
        self.reclaim.reclaimer.reserve(pages)?;

        let result = SgObject::build(SgSize::Big(pages as u32), size_bytes, Clustering::None, &*self.default_source, self.config.local_order, self.config.trans_order);
        self.other_alloc.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(obj) => {
                self.other_pages.fetch_add(obj.pages_held() as u64, Ordering::Relaxed);
                if obj.sg_count() < pages {
                    self.other_merged.fetch_add(1, Ordering::Relaxed);
                }
                Ok(SgHandle { object: obj, origin: Origin::Unowned })
            }
            Err((obj, filled)) => {
                let unused = pages - filled;
                self.reclaim.reclaimer.release(unused);
                if flags.contains(AllocFlags::RETURN_OBJ_ON_ALLOC_FAIL) {
                    self.other_pages.fetch_add(filled as u64, Ordering::Relaxed);
                    Ok(SgHandle { object: obj, origin: Origin::Unowned })
                } else {
                    self.reclaim.reclaimer.release(filled as usize);
                    obj.release_pages(&*self.default_source);
                    Err(AllocError::OutOfMemory)
                }
            }
        }
    }

    /// Release a handle acquired through [`scst_alloc`](Self::scst_alloc).
    pub fn scst_free(&self, handle: SgHandle) {
        let pages = handle.object.pages_held();
        self.reclaim.reclaimer.release(pages);
        handle.object.release_pages(&*self.default_source);
    }

    /// Snapshot every pool's counters plus the global header fields
    /// (`report`, C13).
    pub fn report(&self) -> StatsReport {
        StatsReport::collect(&self.registry, &self.reclaim.reclaimer, self.other_alloc.load(Ordering::Relaxed), self.other_merged.load(Ordering::Relaxed), self.other_pages.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::mem_lim_new;

    #[test]
    fn presets_are_created_eagerly_and_reachable_by_name() {
        let runtime = AllocatorRuntime::new(AllocatorConfig::default());
        assert_eq!(runtime.norm_pool().name, NORM_POOL);
        assert_eq!(runtime.norm_clust_pool().name, NORM_CLUST_POOL);
        assert_eq!(runtime.dma_pool().name, DMA_POOL);
    }

    #[test]
    fn zero_size_alloc_charges_nothing() {
        let runtime = AllocatorRuntime::new(AllocatorConfig::default());
        let quota = mem_lim_new(10);
        let pool = runtime.norm_pool();
        let handle = runtime.alloc(&pool, 0, AllocFlags::empty(), &quota, None).unwrap();
        assert_eq!(handle.count(), 0);
        assert_eq!(quota.allocated_pages(), 0);
    }

    #[test]
    fn cache_hit_round_trip() {
        let runtime = AllocatorRuntime::new(AllocatorConfig::default());
        let quota = mem_lim_new(100);
        let pool = runtime.norm_pool();
        let h1 = runtime.alloc(&pool, PAGE_SIZE, AllocFlags::empty(), &quota, None).unwrap();
        assert_eq!(h1.count(), 1);
        assert_eq!(quota.allocated_pages(), 1);
        runtime.free(h1, &quota);
        assert_eq!(quota.allocated_pages(), 0);
        let h2 = runtime.alloc(&pool, PAGE_SIZE, AllocFlags::empty(), &quota, None).unwrap();
        assert_eq!(h2.count(), 1);
        assert_eq!(quota.allocated_pages(), 1);
        assert_eq!(pool.bucket_stats()[0].hit, 1);
        assert_eq!(pool.bucket_stats()[0].total, 2);
        runtime.free(h2, &quota);
        assert_eq!(quota.allocated_pages(), 0);
    }

    #[test]
    fn cache_hit_is_rejected_by_an_exhausted_quota_and_the_object_stays_cached() {
        let runtime = AllocatorRuntime::new(AllocatorConfig::default());
        let pool = runtime.norm_pool();
        let filling_quota = mem_lim_new(1);
        let h1 = runtime.alloc(&pool, PAGE_SIZE, AllocFlags::empty(), &filling_quota, None).unwrap();
        runtime.free(h1, &filling_quota);
        assert_eq!(pool.bucket_stats()[0].cached_entries, 1);

        let exhausted_quota = mem_lim_new(0);
        let err = runtime.alloc(&pool, PAGE_SIZE, AllocFlags::empty(), &exhausted_quota, None).unwrap_err();
        assert!(matches!(err, AllocError::QuotaExceeded { .. }));
        assert_eq!(exhausted_quota.allocated_pages(), 0);
        // the popped cache hit must be re-banked, not leaked.
        assert_eq!(pool.bucket_stats()[0].cached_entries, 1);

        let other_quota = mem_lim_new(10);
        let h2 = runtime.alloc(&pool, PAGE_SIZE, AllocFlags::empty(), &other_quota, None).unwrap();
        assert_eq!(h2.count(), 1);
        runtime.free(h2, &other_quota);
    }

    #[test]
    fn no_alloc_on_cache_miss_shell_is_not_re_banked_as_a_bogus_hit() {
        let runtime = AllocatorRuntime::new(AllocatorConfig::default());
        let quota = mem_lim_new(10);
        let pool = runtime.norm_pool();
        let shell = runtime.alloc(&pool, PAGE_SIZE, AllocFlags::NO_ALLOC_ON_CACHE_MISS, &quota, None).unwrap();
        assert_eq!(shell.pages_held(), 0);
        assert_eq!(shell.count(), 0);
        runtime.free(shell, &quota);
        assert_eq!(pool.bucket_stats()[0].cached_entries, 0);

        let handle = runtime.alloc(&pool, PAGE_SIZE, AllocFlags::empty(), &quota, None).unwrap();
        assert_eq!(handle.count(), 1);
        assert_eq!(handle.pages_held(), 1);
        runtime.free(handle, &quota);
    }

    #[test]
    fn priv_data_survives_a_cache_hit() {
        let runtime = AllocatorRuntime::new(AllocatorConfig::default());
        let quota = mem_lim_new(100);
        let pool = runtime.norm_pool();
        let h1 = runtime.alloc(&pool, PAGE_SIZE, AllocFlags::empty(), &quota, Some(Arc::new(7u32))).unwrap();
        runtime.free(h1, &quota);
        let h2 = runtime.alloc(&pool, PAGE_SIZE, AllocFlags::empty(), &quota, Some(Arc::new(9u32))).unwrap();
        let v = h2.priv_data().unwrap().downcast_ref::<u32>().unwrap();
        assert_eq!(*v, 7);
        runtime.free(h2, &quota);
    }

    #[test]
    fn quota_rejects_over_ceiling_and_leaves_state_unchanged() {
        let runtime = AllocatorRuntime::new(AllocatorConfig::default());
        let quota = mem_lim_new(1);
        let pool = runtime.norm_pool();
        let err = runtime.alloc(&pool, 2 * PAGE_SIZE, AllocFlags::empty(), &quota, None).unwrap_err();
        assert!(matches!(err, AllocError::QuotaExceeded { .. }));
        assert_eq!(quota.allocated_pages(), 0);
    }

    #[test]
    fn oversized_request_forces_the_big_path() {
        let config = AllocatorConfig::default();
        let order_max = config.order_max;
        let runtime = AllocatorRuntime::new(config);
        let quota = mem_lim_new(1 << (order_max + 2));
        let pool = runtime.norm_pool();
        let size = (1usize << order_max) * PAGE_SIZE;
        let handle = runtime.alloc(&pool, size, AllocFlags::empty(), &quota, None).unwrap();
        assert_eq!(handle.pages_held(), 1 << order_max);
        assert_eq!(pool.bucket_stats().iter().map(|b| b.cached_entries).sum::<usize>(), 0);
        runtime.free(handle, &quota);
    }

    #[test]
    fn scst_alloc_does_not_touch_any_pool() {
        let runtime = AllocatorRuntime::new(AllocatorConfig::default());
        let handle = runtime.scst_alloc(PAGE_SIZE, AllocFlags::empty()).unwrap();
        assert_eq!(handle.count(), 1);
        runtime.scst_free(handle);
    }
}
