//! Global constants used throughout the allocator.
//!
//! This module centralises compile-time tunables so no magic numbers leak
//! into the allocation and reclaim paths.

/// Platform page size in bytes. Real kernels expose this via `PAGE_SIZE`;
/// user-space callers of this crate are expected to run on a 4 KiB page
/// architecture, matching the overwhelming majority of deployment targets.
pub const PAGE_SIZE: usize = 4096;

/// Number of per-order bucket size classes, `order ∈ [0, ORDER_MAX)`.
/// Bucket `ORDER_MAX - 1` caches objects of `2^(ORDER_MAX-1)` pages.
pub const ORDER_MAX: u8 = 14;

/// Number of pages per backing slab allocated from the platform allocator.
/// Sized so that clustering has a realistic amount of physically contiguous
/// run to coalesce within a single slab.
pub const DEFAULT_PAGES_PER_SLAB: usize = 512;

/// Interval between successive purge sweeps of a pool's inactive LRU.
pub const PURGE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Minimum idle time before the purge worker reclaims an object.
pub const PURGE_TIME_AFTER: std::time::Duration = std::time::Duration::from_secs(60);

/// Minimum idle time the shrinker honours under memory pressure; much lower
/// than [`PURGE_TIME_AFTER`] since pressure can justify evicting objects
/// that were only just released.
pub const SHRINK_AGE_MIN: std::time::Duration = std::time::Duration::from_secs(1);

/// Maximum number of pages the shrinker reclaims from a single pool per call,
/// so that one oversized pool cannot starve the rest of a shrink pass.
pub const MAX_PAGES_PER_POOL: usize = 50;

/// Order above which `sg_entries` (and, separately, `trans_tbl`) are
/// allocated externally rather than sized to fit within the object's own
/// allocation. Computed conceptually from the platform page size and the
/// size of the embedded records; fixed here since this crate does not lay
/// objects out via a flexible tail allocation (see DESIGN.md).
pub const DEFAULT_LOCAL_ORDER: u8 = 3;

/// Order above which `trans_tbl` alone is still considered small enough to
/// keep without a dedicated heap allocation.
pub const DEFAULT_TRANS_ORDER: u8 = 5;
