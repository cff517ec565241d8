//! `sgv_mem`: a clustering-aware scatter-gather vector pool allocator.
//!
//! Serves scatter-gather vectors to concurrent callers from per-order
//! bucketed caches, coalescing physically adjacent pages where clustering is
//! enabled, and cooperating with a global watermark-governed reclaimer so
//! that no single pool's cache can run the process out of memory. See
//! `SPEC_FULL.md` and `DESIGN.md` for the full design.

pub mod bucket;
pub mod clustering;
pub mod constants;
pub mod core;
pub mod handle;
pub mod page;
pub mod pool;
pub mod quota;
pub mod reclaim;
pub mod registry;
pub mod sg;
pub mod stats;
pub mod types;

use std::sync::Arc;

use once_cell::sync::Lazy;

pub use clustering::Clustering;
pub use core::{AllocatorConfig, AllocatorRuntime};
pub use handle::SgHandle;
pub use page::PageSource;
pub use quota::{mem_lim_new, MemLim};
pub use sg::PrivData;
pub use stats::StatsReport;
pub use types::{AllocError, AllocFlags, ObjectId, OwnerId, Result};

/// Handle to a named, possibly shared, pool (`Arc<Pool>`). Kept alive by any
/// caller still holding a clone even after [`pool_destroy`] drops the
/// registry's own reference.
pub type PoolHandle = Arc<pool::Pool>;

static RUNTIME: Lazy<Arc<AllocatorRuntime>> = Lazy::new(|| AllocatorRuntime::new(AllocatorConfig::default()));

/// The process-wide allocator instance backing every free function below.
pub fn runtime() -> Arc<AllocatorRuntime> {
    RUNTIME.clone()
}

/// Create, or join as a shared consumer, a named pool.
pub fn pool_create(name: &str, clustering: Clustering, shared: bool, owner: OwnerId) -> Result<PoolHandle> {
    RUNTIME.pool_create(name, clustering, shared, owner)
}

/// Drop a logical reference to `pool`; once the last reference drops, its
/// cache is flushed and its pages freed.
pub fn pool_destroy(pool: PoolHandle) {
    RUNTIME.pool_destroy(pool)
}

/// Destroy every cached object in `pool` without removing it from the
/// registry.
pub fn pool_flush(pool: &PoolHandle) {
    RUNTIME.pool_flush(pool)
}

/// Acquire an SG object from `pool`, charging `quota` for any freshly
/// allocated pages.
pub fn alloc(pool: &PoolHandle, size_bytes: usize, flags: AllocFlags, quota: &MemLim, priv_data: Option<PrivData>) -> Result<SgHandle> {
    RUNTIME.alloc(pool, size_bytes, flags, quota, priv_data)
}

/// Release a handle acquired through [`alloc`].
pub fn free(handle: SgHandle, quota: &MemLim) {
    RUNTIME.free(handle, quota)
}

/// Build an SG object outside any pool, with no clustering and no quota
/// charge (the SCSI mid-layer's direct, non-cached path).
pub fn scst_alloc(size_bytes: usize, flags: AllocFlags) -> Result<SgHandle> {
    RUNTIME.scst_alloc(size_bytes, flags)
}

/// Release a handle acquired through [`scst_alloc`].
pub fn scst_free(handle: SgHandle) {
    RUNTIME.scst_free(handle)
}

/// Rebind `pool`'s page source, e.g. to a caller-supplied DMA-constrained
/// region.
pub fn set_allocator(pool: &PoolHandle, source: Arc<dyn PageSource>) {
    RUNTIME.set_allocator(pool, source)
}

/// Snapshot every pool's counters plus the reclaimer's global header fields.
pub fn report() -> StatsReport {
    RUNTIME.report()
}

/// The eager, non-clustering preset pool (`sgv_norm_pool`).
pub fn norm_pool() -> PoolHandle {
    RUNTIME.norm_pool()
}

/// The eager, full-clustering preset pool (`sgv_norm_clust_pool`).
pub fn norm_clust_pool() -> PoolHandle {
    RUNTIME.norm_clust_pool()
}

/// The eager DMA-oriented preset pool (`sgv_dma_pool`). Bind it to a
/// bounded-region source with [`set_allocator`] before relying on its pages
/// actually living in a constrained region.
pub fn dma_pool() -> PoolHandle {
    RUNTIME.dma_pool()
}
