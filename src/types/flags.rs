//! Caller-supplied flags controlling `alloc`'s cache and fallback behaviour.

bitflags::bitflags! {
    /// Flags accepted by [`alloc`](crate::alloc).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AllocFlags: u32 {
        /// Bypass the bucket cache entirely and build a big, never-cached
        /// object sized in exact pages.
        const NO_CACHED = 1 << 0;

        /// If no cached object is available for the requested bucket,
        /// return a shell object with zero pages instead of allocating, for
        /// the caller to fill out-of-band.
        const NO_ALLOC_ON_CACHE_MISS = 1 << 1;

        /// On a partial page-allocation failure, return the partially
        /// filled object instead of destroying it.
        const RETURN_OBJ_ON_ALLOC_FAIL = 1 << 2;
    }
}

impl Default for AllocFlags {
    fn default() -> Self {
        AllocFlags::empty()
    }
}
