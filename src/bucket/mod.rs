//! Per-order bucketed free-lists (C5, bucket half).
//!
//! A [`Bucket`] holds every cached (inactive) [`SgObject`] of one size class,
//! kept sorted by ascending `sg_count` so the most-merged (highest physical
//! contiguity) object is reused first. The pool's time-sorted LRU and purge
//! cursor live one level up, in [`crate::pool`], since eviction needs to
//! cross buckets.

use crate::sg::SgObject;
use crate::types::ObjectId;

/// Free-list and running counters for objects of a single `2^order` size.
#[derive(Debug, Default)]
pub struct Bucket {
    /// Cached objects, sorted by ascending `sg_count`.
    objects: Vec<SgObject>,
    /// Cache hits served from this bucket.
    pub hit: u64,
    /// Total acquires (hit or miss) against this bucket.
    pub total: u64,
    /// Acquires that were merged into fewer than `2^order` entries.
    pub merged: u64,
}

impl Bucket {
    /// Number of cached entries currently held.
    pub fn cached_entries(&self) -> usize {
        self.objects.len()
    }

    /// Total pages held across every cached entry in this bucket.
    pub fn cached_pages(&self) -> usize {
        self.objects.iter().map(|o| o.pages_held()).sum()
    }

    /// Pop the most-merged cached object, if any.
    pub fn acquire(&mut self) -> Option<SgObject> {
        if self.objects.is_empty() {
            None
        } else {
            Some(self.objects.remove(0))
        }
    }

    /// Insert a released object, keeping the free-list sorted by ascending
    /// `sg_count`.
    pub fn release(&mut self, obj: SgObject) {
        let pos = self.objects.partition_point(|o| o.sg_count() <= obj.sg_count());
        self.objects.insert(pos, obj);
    }

    /// Remove a specific cached object by id, used when the LRU evicts it.
    pub fn remove_by_id(&mut self, id: ObjectId) -> Option<SgObject> {
        let pos = self.objects.iter().position(|o| o.id == id)?;
        Some(self.objects.remove(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::Clustering;
    use crate::page::DefaultPageSource;
    use crate::sg::SgSize;

    fn build(order: u8, source: &DefaultPageSource) -> SgObject {
        SgObject::build(SgSize::Bucketed(order), (1usize << order) * 4096, Clustering::None, source, 3, 5)
            .expect("fill succeeds")
    }

    #[test]
    fn acquire_on_empty_bucket_returns_none() {
        let mut bucket = Bucket::default();
        assert!(bucket.acquire().is_none());
    }

    #[test]
    fn release_then_acquire_is_a_cache_hit() {
        let source = DefaultPageSource::new();
        let mut bucket = Bucket::default();
        let obj = build(0, &source);
        let id = obj.id;
        bucket.release(obj);
        assert_eq!(bucket.cached_entries(), 1);
        let reacquired = bucket.acquire().unwrap();
        assert_eq!(reacquired.id, id);
        assert_eq!(bucket.cached_entries(), 0);
    }

    #[test]
    fn free_list_stays_sorted_by_ascending_sg_count() {
        let source = DefaultPageSource::new();
        let mut bucket = Bucket::default();
        // Two objects of the same order, one fully merged (sg_count=1),
        // one deliberately left unmerged (sg_count=2).
        let merged = SgObject::build(SgSize::Bucketed(1), 2 * 4096, Clustering::Tail, &source, 3, 5).unwrap();
        let unmerged = SgObject::build(SgSize::Bucketed(1), 2 * 4096, Clustering::None, &source, 3, 5).unwrap();
        bucket.release(unmerged);
        bucket.release(merged);
        let first = bucket.acquire().unwrap();
        assert!(first.sg_count() <= 1);
    }

    #[test]
    fn remove_by_id_extracts_a_specific_object() {
        let source = DefaultPageSource::new();
        let mut bucket = Bucket::default();
        let a = build(0, &source);
        let b = build(0, &source);
        let b_id = b.id;
        bucket.release(a);
        bucket.release(b);
        let removed = bucket.remove_by_id(b_id).unwrap();
        assert_eq!(removed.id, b_id);
        assert_eq!(bucket.cached_entries(), 1);
    }
}
