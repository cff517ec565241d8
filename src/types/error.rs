//! Error types and handling for the scatter-gather vector pool allocator.
//!
//! All failures the allocator can surface, optimised for zero-cost
//! propagation: callers match on `AllocError` and decide whether to retry,
//! back off a single consumer, or back off globally.

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AllocError>;

/// Failure kinds surfaced by the allocator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AllocError {
    /// Page or metadata allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// The caller's [`MemLim`](crate::quota::MemLim) would exceed its ceiling.
    #[error("quota exceeded: requested {requested} pages, {available} available")]
    QuotaExceeded {
        /// Pages the caller asked to charge.
        requested: usize,
        /// Pages still available under the quota ceiling.
        available: usize,
    },

    /// The global high watermark was breached and shrinking did not recover
    /// enough pages to admit the request.
    #[error("watermark exceeded: requested {requested} pages, ceiling {ceiling} pages")]
    WatermarkExceeded {
        /// Pages the caller asked to reserve.
        requested: usize,
        /// The configured high watermark, in pages.
        ceiling: usize,
    },

    /// A pool with the same name already exists under a different owner, or
    /// a non-shared create collided with an existing name.
    #[error("pool conflict: {name}")]
    PoolConflict {
        /// The contended pool name.
        name: String,
    },
}
