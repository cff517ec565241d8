//! The opaque object handle `alloc`/`scst_alloc` return and `free`/
//! `scst_free` consume.

use std::sync::Arc;

use crate::pool::Pool;
use crate::sg::{PrivData, SgEntry, SgObject};

/// Where a handle's pages came from, and so how `free` should dispose of
/// them.
pub(crate) enum Origin {
    /// A bucketed object at this order; release returns it to the pool's
    /// cache instead of freeing its pages.
    Bucketed { pool: Arc<Pool>, order: u8 },
    /// A big, never-cached object built through a pool (`NO_CACHED`, or a
    /// size past the largest bucket).
    PoolBig { pool: Arc<Pool> },
    /// Built through `scst_alloc`, or a zero-size shell: no owning pool.
    Unowned,
}

/// Handle to a single live SG object.
///
/// Exposes the populated entries for the caller to hand to its own I/O
/// path; returned to [`free`](crate::free)/[`scst_free`](crate::scst_free)
/// to release it.
pub struct SgHandle {
    pub(crate) object: SgObject,
    pub(crate) origin: Origin,
}

impl SgHandle {
    /// The populated SG entries.
    pub fn entries(&self) -> &[SgEntry] {
        &self.object.entries
    }

    /// Number of populated entries (`<=` raw page count once clustered).
    pub fn count(&self) -> usize {
        self.object.sg_count()
    }

    /// Total bytes spanned by the populated entries.
    pub fn bytes(&self) -> usize {
        self.object.bytes()
    }

    /// The caller-supplied opaque data, if any has been set (preserved
    /// across cache hits; see invariant 7).
    pub fn priv_data(&self) -> Option<&PrivData> {
        self.object.priv_data()
    }

    /// Pages this handle currently holds (zero for a
    /// `NO_ALLOC_ON_CACHE_MISS` shell).
    pub fn pages_held(&self) -> usize {
        self.object.pages_held()
    }
}
