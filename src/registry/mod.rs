//! Pool registry (C8): named-pool directory with shared-ownership reuse,
//! lifecycle, and a round-robin cursor for the shrinker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::clustering::Clustering;
use crate::page::PageSource;
use crate::pool::Pool;
use crate::types::{AllocError, OwnerId, Result};

/// Directory of every live pool, keyed by name.
///
/// `registry_mutex` (here, `create_mutex`) serialises create/destroy against
/// each other; `order` plus `cursor` realise `registry_lock`'s round-robin
/// bookkeeping. Per-pool state lives behind each `Pool`'s own lock, never
/// under the registry's.
pub struct Registry {
    pools: DashMap<String, Arc<Pool>>,
    order: Mutex<Vec<String>>,
    cursor: AtomicUsize,
    create_mutex: Mutex<()>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Registry {
            pools: DashMap::new(),
            order: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            create_mutex: Mutex::new(()),
        }
    }

    /// Look up `name`, bumping its reference count under `shared`
    /// semantics, or create and insert a fresh pool.
    #[allow(clippy::too_many_arguments)]
    pub fn lookup_or_create(
        &self,
        name: &str,
        clustering: Clustering,
        shared: bool,
        owner: OwnerId,
        source: Arc<dyn PageSource>,
        order_max: u8,
        local_order: u8,
        trans_order: u8,
    ) -> Result<Arc<Pool>> {
        let _guard = self.create_mutex.lock();

        if let Some(existing) = self.pools.get(name) {
            return if existing.can_share_with(owner, shared) {
                existing.bump_ref();
                Ok(existing.value().clone())
            } else {
                Err(AllocError::PoolConflict { name: name.to_string() })
            };
        }

        let pool = Arc::new(Pool::new(name, clustering, owner, shared, source, order_max, local_order, trans_order));
        self.pools.insert(name.to_string(), pool.clone());
        self.order.lock().push(name.to_string());
        Ok(pool)
    }

    /// Drop a logical reference to `pool`. Returns the pool for flushing if
    /// this was the last reference (the caller removes it from the
    /// registry's bookkeeping and frees its pages).
    pub fn destroy(&self, pool: &Arc<Pool>) -> Option<Arc<Pool>> {
        let _guard = self.create_mutex.lock();
        if pool.drop_ref() > 0 {
            return None;
        }
        self.pools.remove(&pool.name);
        self.order.lock().retain(|n| n != &pool.name);
        Some(pool.clone())
    }

    /// Number of registered pools.
    pub fn len(&self) -> usize {
        self.order.lock().len()
    }

    /// Whether any pool is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every registered pool, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<Pool>> {
        self.order
            .lock()
            .iter()
            .filter_map(|name| self.pools.get(name).map(|p| p.value().clone()))
            .collect()
    }

    /// Advance and return the round-robin cursor, wrapping at the current
    /// pool count. Advances before use, so no single pool can monopolise
    /// consecutive shrink calls.
    pub fn advance_cursor(&self) -> usize {
        let len = self.len().max(1);
        self.cursor.fetch_add(1, Ordering::AcqRel) % len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::DefaultPageSource;

    fn source() -> Arc<dyn PageSource> {
        Arc::new(DefaultPageSource::new())
    }

    #[test]
    fn shared_lookup_with_matching_owner_bumps_ref() {
        let reg = Registry::new();
        let owner = OwnerId(1);
        let a = reg.lookup_or_create("p", Clustering::None, true, owner, source(), 14, 3, 5).unwrap();
        let b = reg.lookup_or_create("p", Clustering::None, true, owner, source(), 14, 3, 5).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn shared_lookup_with_different_owner_conflicts() {
        let reg = Registry::new();
        reg.lookup_or_create("p", Clustering::None, true, OwnerId(1), source(), 14, 3, 5).unwrap();
        let err = reg.lookup_or_create("p", Clustering::None, true, OwnerId(2), source(), 14, 3, 5).unwrap_err();
        assert!(matches!(err, AllocError::PoolConflict { .. }));
    }

    #[test]
    fn destroy_removes_only_once_refs_reach_zero() {
        let reg = Registry::new();
        let owner = OwnerId(1);
        let a = reg.lookup_or_create("p", Clustering::None, true, owner, source(), 14, 3, 5).unwrap();
        let b = reg.lookup_or_create("p", Clustering::None, true, owner, source(), 14, 3, 5).unwrap();
        assert!(reg.destroy(&a).is_none());
        assert_eq!(reg.len(), 1);
        assert!(reg.destroy(&b).is_some());
        assert_eq!(reg.len(), 0);
    }
}
