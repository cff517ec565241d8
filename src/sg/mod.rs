//! The SG object (C4): a single cached scatter-gather vector plus the pages
//! it owns.

pub mod entry;

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

pub use entry::{SgEntry, TransTbl};

use crate::clustering::{cluster_page, Clustering};
use crate::constants::PAGE_SIZE;
use crate::page::{Page, PageSource};
use crate::types::ObjectId;

/// Replaces the signed `order_or_pages` discriminant of the source: a
/// non-negative bucket order, or an exact page count for a big, never-cached
/// object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SgSize {
    /// A bucketed object of `2^order` pages.
    Bucketed(u8),
    /// A big, one-off object of exactly this many pages.
    Big(u32),
}

impl SgSize {
    /// Total pages this object is sized for.
    pub fn pages(&self) -> usize {
        match *self {
            SgSize::Bucketed(order) => 1usize << order,
            SgSize::Big(pages) => pages as usize,
        }
    }

    /// The bucket order, if this is a bucketed size.
    pub fn order(&self) -> Option<u8> {
        match *self {
            SgSize::Bucketed(order) => Some(order),
            SgSize::Big(_) => None,
        }
    }
}

/// Layout policy chosen at construction to minimise heap-allocation churn
/// for small objects. The source colocates `sg_entries`/`trans_tbl` inside
/// the object's own flexible-array allocation; this crate keeps the same
/// three-tier policy but realises it as distinct construction paths over
/// ordinary `Vec`s rather than pointer-punned embedding, since Rust has no
/// safe equivalent to a C flexible array member (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SgLayout {
    /// Both `sg_entries` and `trans_tbl` sized to fit without growth.
    Embedded,
    /// Only `trans_tbl` is pre-sized to fit without growth.
    TransTblOnly,
    /// Both arrays are ordinary, independently grown heap allocations.
    External,
}

/// Decide the layout policy for a given size, matching `sgv_alloc_arrays`'s
/// `order <= local_order` / `order <= trans_order` tiers.
pub fn layout_for(size: SgSize, local_order: u8, trans_order: u8) -> SgLayout {
    match size.order() {
        Some(order) if order <= local_order => SgLayout::Embedded,
        Some(order) if order <= trans_order => SgLayout::TransTblOnly,
        _ => SgLayout::External,
    }
}

/// Opaque per-object data supplied by the caller at first fill. Preserved
/// across cache hits: later callers that reuse a cached object receive the
/// first caller's `priv`, never overwrite it.
pub type PrivData = Arc<dyn Any + Send + Sync>;

/// A single cached SG vector: header, entry array, optional translation
/// table, and ownership of the pages it spans.
pub struct SgObject {
    /// Process-unique identity, handed back to callers as part of `SgHandle`.
    pub id: ObjectId,
    /// Bucketed or big discriminant.
    pub size: SgSize,
    /// Populated SG entries (`len() <= size.pages()` once clustered).
    pub entries: Vec<SgEntry>,
    /// Present only when clustering is enabled for the owning pool.
    pub trans_tbl: Option<TransTbl>,
    /// Layout policy this object was constructed with.
    pub layout: SgLayout,
    pages: Vec<Page>,
    /// Index of the last entry truncated at release time; `None` if the
    /// requested size was already page-aligned.
    orig_last_index: Option<usize>,
    /// The pre-truncation length of that entry, restored on release.
    orig_last_length: Option<usize>,
    /// Set when the object enters a bucket's inactive LRU; cleared on reuse.
    pub released_at: Option<Instant>,
    priv_data: Option<PrivData>,
}

impl std::fmt::Debug for SgObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SgObject")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("entries", &self.entries)
            .field("layout", &self.layout)
            .field("pages_held", &self.pages.len())
            .field("has_priv", &self.priv_data.is_some())
            .finish()
    }
}

impl SgObject {
    /// Number of populated SG entries.
    pub fn sg_count(&self) -> usize {
        self.entries.len()
    }

    /// Total bytes spanned by the populated entries.
    pub fn bytes(&self) -> usize {
        self.entries.iter().map(|e| e.length).sum()
    }

    /// The caller-supplied opaque data, if any has been set yet.
    pub fn priv_data(&self) -> Option<&PrivData> {
        self.priv_data.as_ref()
    }

    /// Set `priv` only if this is the object's first fill (invariant 7).
    pub fn set_priv_if_absent(&mut self, priv_data: PrivData) {
        if self.priv_data.is_none() {
            self.priv_data = Some(priv_data);
        }
    }

    /// Build a fully filled object, allocating pages one at a time and
    /// running the clusterer after each. On a mid-fill allocation failure
    /// returns the partially filled object and the number of pages it holds,
    /// so the caller can honour `RETURN_OBJ_ON_ALLOC_FAIL`.
    pub fn build(
        size: SgSize,
        size_bytes: usize,
        clustering: Clustering,
        source: &dyn PageSource,
        local_order: u8,
        trans_order: u8,
    ) -> Result<SgObject, (SgObject, usize)> {
        let pages_to_alloc = size.pages();
        let mut entries = Vec::with_capacity(pages_to_alloc);
        let mut pages = Vec::with_capacity(pages_to_alloc);
        let mut hint = None;

        for _ in 0..pages_to_alloc {
            match source.alloc_one_page() {
                Some(page) => {
                    let pfn = page.pfn();
                    pages.push(page);
                    cluster_page(clustering, &mut entries, &mut hint, pfn);
                }
                None => {
                    let filled = pages.len();
                    let obj = Self::from_parts(size, entries, pages, clustering, local_order, trans_order);
                    return Err((obj, filled));
                }
            }
        }

        let mut obj = Self::from_parts(size, entries, pages, clustering, local_order, trans_order);
        obj.truncate_to(size_bytes);
        Ok(obj)
    }

    /// A zero-page placeholder for `NO_ALLOC_ON_CACHE_MISS`: no pages are
    /// allocated and no entries are built.
    pub fn shell(size: SgSize, local_order: u8, trans_order: u8) -> SgObject {
        Self::from_parts(size, Vec::new(), Vec::new(), Clustering::None, local_order, trans_order)
    }

    fn from_parts(
        size: SgSize,
        entries: Vec<SgEntry>,
        pages: Vec<Page>,
        clustering: Clustering,
        local_order: u8,
        trans_order: u8,
    ) -> SgObject {
        let trans_tbl = if clustering != Clustering::None {
            Some(TransTbl::build(&entries, size.pages()))
        } else {
            None
        };

        SgObject {
            id: ObjectId::next(),
            layout: layout_for(size, local_order, trans_order),
            size,
            entries,
            trans_tbl,
            pages,
            orig_last_index: None,
            orig_last_length: None,
            released_at: None,
            priv_data: None,
        }
    }

    /// Truncate the last SG entry so the object's total byte span equals
    /// exactly `size_bytes`, remembering the pre-truncation length and index
    /// so [`restore_truncation`](Self::restore_truncation) can undo it.
    pub(crate) fn truncate_to(&mut self, size_bytes: usize) {
        if size_bytes == 0 || self.entries.is_empty() {
            return;
        }
        let remainder = size_bytes % PAGE_SIZE;
        if remainder == 0 {
            return;
        }
        let last = self.entries.len() - 1;
        let shrink_by = PAGE_SIZE - remainder;
        self.orig_last_index = Some(last);
        self.orig_last_length = Some(self.entries[last].length);
        self.entries[last].length -= shrink_by;
    }

    /// Undo a previous truncation, restoring the last entry's original
    /// length. Called when a bucketed object is released back to its pool.
    pub fn restore_truncation(&mut self) {
        if let (Some(idx), Some(len)) = (self.orig_last_index.take(), self.orig_last_length.take()) {
            self.entries[idx].length = len;
        }
    }

    /// Hand ownership of this object's pages back to the given source,
    /// consuming the object. Used when destroying a big or evicted object.
    pub fn release_pages(mut self, source: &dyn PageSource) {
        let pages = std::mem::take(&mut self.pages);
        if !pages.is_empty() {
            source.free_pages(pages);
        }
    }

    /// Number of pages this object currently owns (may be less than
    /// `size.pages()` if a fill failed partway through).
    pub fn pages_held(&self) -> usize {
        self.pages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::DefaultPageSource;

    #[test]
    fn build_round_trips_exact_byte_span() {
        let source = DefaultPageSource::new();
        let obj = SgObject::build(SgSize::Bucketed(3), 5 * PAGE_SIZE + 100, Clustering::Tail, &source, 3, 5)
            .expect("fill succeeds");
        assert_eq!(obj.bytes(), 5 * PAGE_SIZE + 100);
    }

    #[test]
    fn truncation_round_trips_through_restore() {
        let source = DefaultPageSource::new();
        let mut obj = SgObject::build(SgSize::Bucketed(0), 1, Clustering::None, &source, 3, 5).unwrap();
        assert_eq!(obj.bytes(), 1);
        obj.restore_truncation();
        assert_eq!(obj.bytes(), PAGE_SIZE);
    }

    #[test]
    fn zero_size_entry_is_untouched_by_truncation() {
        let source = DefaultPageSource::new();
        let mut obj = SgObject::build(SgSize::Bucketed(2), 4 * PAGE_SIZE, Clustering::None, &source, 3, 5).unwrap();
        let before = obj.entries.clone();
        obj.truncate_to(4 * PAGE_SIZE);
        assert_eq!(obj.entries, before);
    }

    #[test]
    fn priv_data_is_set_only_once() {
        let source = DefaultPageSource::new();
        let mut obj = SgObject::build(SgSize::Bucketed(0), PAGE_SIZE, Clustering::None, &source, 3, 5).unwrap();
        obj.set_priv_if_absent(Arc::new(1u32));
        obj.set_priv_if_absent(Arc::new(2u32));
        let v = obj.priv_data().unwrap().downcast_ref::<u32>().unwrap();
        assert_eq!(*v, 1);
    }
}
