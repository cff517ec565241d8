//! Bucketed pool (C5, pool half): owns a pool's buckets, its time-sorted
//! inactive LRU, and the page source it draws from.
//!
//! A `Pool` never touches quota or the global watermark - those are the
//! caller's (ultimately [`crate::core::runtime::AllocatorRuntime`]'s)
//! responsibility. A pool only knows how to serve a cache hit, fill a miss,
//! and evict its oldest inactive object.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::bucket::Bucket;
use crate::clustering::Clustering;
use crate::page::PageSource;
use crate::sg::{SgObject, SgSize};
use crate::types::{ObjectId, OwnerId};

/// A single LRU record: enough to find and evict the object it names
/// without scanning every bucket.
#[derive(Debug, Clone, Copy)]
struct InactiveEntry {
    order: u8,
    id: ObjectId,
    released_at: Instant,
}

#[derive(Debug, Default)]
struct PoolState {
    buckets: Vec<Bucket>,
    inactive: VecDeque<InactiveEntry>,
}

/// Named bucketed cache (§3 `Pool`).
pub struct Pool {
    /// Pool name, unique within its registry.
    pub name: String,
    /// Clustering mode every object built by this pool uses.
    pub clustering: Clustering,
    owner: OwnerId,
    shared: bool,
    refs: AtomicUsize,
    source: Mutex<Arc<dyn PageSource>>,
    state: Mutex<PoolState>,
    purge_scheduled: AtomicBool,
    local_order: u8,
    trans_order: u8,
    big_alloc: AtomicU64,
    big_merged: AtomicU64,
    big_pages: AtomicU64,
}

impl Pool {
    /// Construct a pool bound to `source`, with `order_max` per-order
    /// buckets.
    pub fn new(
        name: impl Into<String>,
        clustering: Clustering,
        owner: OwnerId,
        shared: bool,
        source: Arc<dyn PageSource>,
        order_max: u8,
        local_order: u8,
        trans_order: u8,
    ) -> Self {
        let mut buckets = Vec::with_capacity(order_max as usize);
        buckets.resize_with(order_max as usize, Bucket::default);
        Pool {
            name: name.into(),
            clustering,
            owner,
            shared,
            refs: AtomicUsize::new(1),
            source: Mutex::new(source),
            state: Mutex::new(PoolState {
                buckets,
                inactive: VecDeque::new(),
            }),
            purge_scheduled: AtomicBool::new(false),
            local_order,
            trans_order,
            big_alloc: AtomicU64::new(0),
            big_merged: AtomicU64::new(0),
            big_pages: AtomicU64::new(0),
        }
    }

    /// Number of per-order buckets this pool was constructed with.
    pub fn order_max(&self) -> u8 {
        self.state.lock().buckets.len() as u8
    }

    /// Smallest bucket order whose `2^order` pages can hold `pages` pages,
    /// or `None` if that exceeds this pool's largest bucket (the big path).
    pub fn order_for(&self, pages: usize) -> Option<u8> {
        let order_max = self.order_max();
        (0..order_max).find(|&order| (1usize << order) >= pages)
    }

    /// Whether `owner` may reuse this pool under `shared` semantics.
    pub fn can_share_with(&self, owner: OwnerId, shared: bool) -> bool {
        shared && self.shared && self.owner == owner
    }

    /// The identity this pool was created under.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Bump the logical reference count on a successful shared lookup.
    pub fn bump_ref(&self) -> usize {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop the logical reference count; the registry destroys the pool
    /// once this reaches zero.
    pub fn drop_ref(&self) -> usize {
        self.refs.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Replace this pool's page source (`set_allocator`).
    pub fn set_source(&self, source: Arc<dyn PageSource>) {
        *self.source.lock() = source;
    }

    fn source(&self) -> Arc<dyn PageSource> {
        self.source.lock().clone()
    }

    /// Try to pop a cached object for `order` (cache hit path only). On a
    /// hit, restores the object's truncation and re-truncates it for the
    /// (possibly different) byte size now being requested.
    pub fn try_acquire_cached(&self, order: u8, size_bytes: usize) -> Option<SgObject> {
        let mut state = self.state.lock();
        let mut obj = state.buckets[order as usize].acquire()?;
        remove_inactive(&mut state.inactive, obj.id);
        state.buckets[order as usize].hit += 1;
        state.buckets[order as usize].total += 1;
        drop(state);
        obj.restore_truncation();
        obj.truncate_to(size_bytes);
        Some(obj)
    }

    /// Record a cache miss against `order`'s statistics.
    pub fn record_miss(&self, order: u8) {
        self.state.lock().buckets[order as usize].total += 1;
    }

    /// A zero-page placeholder for `NO_ALLOC_ON_CACHE_MISS`: no pages are
    /// allocated at all.
    pub fn shell(&self, order: u8) -> SgObject {
        SgObject::shell(SgSize::Bucketed(order), self.local_order, self.trans_order)
    }

    /// Fill a fresh bucketed object (miss path), drawing pages from this
    /// pool's source. On success, records a merge if fewer entries resulted
    /// than raw pages.
    pub fn fill_bucketed(&self, order: u8, size_bytes: usize) -> std::result::Result<SgObject, (SgObject, usize)> {
        let source = self.source();
        let result = SgObject::build(SgSize::Bucketed(order), size_bytes, self.clustering, &*source, self.local_order, self.trans_order);
        if let Ok(obj) = &result {
            if obj.sg_count() < (1usize << order) {
                self.state.lock().buckets[order as usize].merged += 1;
            }
        }
        result
    }

    /// Fill a big, never-cached object directly, tracking this pool's
    /// `big_*` counters.
    pub fn fill_big(&self, pages: u32, size_bytes: usize) -> std::result::Result<SgObject, (SgObject, usize)> {
        let source = self.source();
        let result = SgObject::build(SgSize::Big(pages), size_bytes, self.clustering, &*source, self.local_order, self.trans_order);
        self.big_alloc.fetch_add(1, Ordering::Relaxed);
        if let Ok(obj) = &result {
            self.big_pages.fetch_add(obj.pages_held() as u64, Ordering::Relaxed);
            if (obj.sg_count() as u32) < pages {
                self.big_merged.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    /// Release a partially- or fully-filled object's pages back to the
    /// source without caching it (destroy path, big free, or a fill
    /// failure the caller chose not to keep).
    pub fn release_pages(&self, obj: SgObject) {
        let source = self.source();
        obj.release_pages(&*source);
    }

    /// Return a bucketed object to its free-list and the inactive LRU,
    /// scheduling a purge pass if none is pending. Returns `true` if this
    /// call is the one that should schedule the purge worker.
    pub fn release_bucketed(&self, order: u8, mut obj: SgObject) -> bool {
        obj.restore_truncation();
        let id = obj.id;
        let mut state = self.state.lock();
        state.buckets[order as usize].release(obj);
        state.inactive.push_back(InactiveEntry {
            order,
            id,
            released_at: Instant::now(),
        });
        !self.purge_scheduled.swap(true, Ordering::AcqRel)
    }

    /// Clear the purge-scheduled flag once a purge sweep has run to
    /// completion without finding more work.
    pub fn clear_purge_scheduled(&self) {
        self.purge_scheduled.store(false, Ordering::Release);
    }

    /// Whether a purge worker is currently scheduled for this pool.
    pub fn purge_scheduled(&self) -> bool {
        self.purge_scheduled.load(Ordering::Acquire)
    }

    /// Total pages currently sitting in this pool's inactive LRU.
    pub fn inactive_pages(&self) -> usize {
        let state = self.state.lock();
        state.buckets.iter().map(Bucket::cached_pages).sum()
    }

    /// Whether the inactive LRU is empty (purge worker stops rescheduling).
    pub fn is_inactive_empty(&self) -> bool {
        self.state.lock().inactive.is_empty()
    }

    /// Evict the single oldest inactive object at least `min_age` old.
    /// Returns the evicted object so the caller can free its pages outside
    /// the pool lock.
    pub fn evict_oldest(&self, min_age: Duration) -> Option<SgObject> {
        let mut state = self.state.lock();
        let ready = matches!(state.inactive.front(), Some(e) if e.released_at.elapsed() >= min_age);
        if !ready {
            return None;
        }
        let entry = state.inactive.pop_front()?;
        state.buckets[entry.order as usize].remove_by_id(entry.id)
    }

    /// Destroy every cached object, freeing their pages (`pool_flush`).
    /// Returns the number of pages freed, so the caller can adjust
    /// `total_pages`.
    pub fn flush(&self) -> usize {
        let source = self.source();
        let mut state = self.state.lock();
        let mut freed = 0usize;
        let orders = state.buckets.len();
        for order in 0..orders {
            while let Some(obj) = state.buckets[order].acquire() {
                freed += obj.pages_held();
                obj.release_pages(&*source);
            }
        }
        state.inactive.clear();
        freed
    }

    /// Per-bucket statistics snapshot, in ascending order.
    pub fn bucket_stats(&self) -> Vec<BucketStats> {
        let state = self.state.lock();
        state
            .buckets
            .iter()
            .enumerate()
            .map(|(order, b)| BucketStats {
                order: order as u8,
                hit: b.hit,
                total: b.total,
                merged: b.merged,
                cached_entries: b.cached_entries(),
                cached_pages: b.cached_pages(),
            })
            .collect()
    }

    /// Big-object statistics: `(big_alloc, big_merged, big_pages)`.
    pub fn big_stats(&self) -> (u64, u64, u64) {
        (
            self.big_alloc.load(Ordering::Relaxed),
            self.big_merged.load(Ordering::Relaxed),
            self.big_pages.load(Ordering::Relaxed),
        )
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("clustering", &self.clustering)
            .field("owner", &self.owner)
            .field("refs", &self.refs.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn remove_inactive(inactive: &mut VecDeque<InactiveEntry>, id: ObjectId) {
    if let Some(pos) = inactive.iter().position(|e| e.id == id) {
        inactive.remove(pos);
    }
}

/// Read-only per-bucket counters, used by [`crate::stats`].
#[derive(Debug, Clone, Copy)]
pub struct BucketStats {
    /// Bucket order (`2^order` pages).
    pub order: u8,
    /// Cache hits served.
    pub hit: u64,
    /// Total acquires.
    pub total: u64,
    /// Acquires whose fill produced fewer entries than raw pages.
    pub merged: u64,
    /// Cached entries currently held.
    pub cached_entries: usize,
    /// Cached pages currently held.
    pub cached_pages: usize,
}
