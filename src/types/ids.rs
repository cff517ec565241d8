//! Small identifier newtypes used across the allocator.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies the consumer that created or is reusing a shared pool.
///
/// Two `pool_create` calls for the same name only succeed together when
/// `shared` is set on both and the `OwnerId` matches; otherwise the second
/// call fails with [`AllocError::PoolConflict`](crate::types::error::AllocError::PoolConflict).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner-{}", self.0)
    }
}

/// Opaque handle identifying a single live SG object that was handed out by
/// `alloc`. Returned to `free` to release the object back to its bucket (or,
/// for big objects, to the platform immediately).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u64);

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

impl ObjectId {
    /// Allocate a fresh, process-unique object id.
    pub fn next() -> Self {
        ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }
}
