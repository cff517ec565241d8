//! Runtime-tunable configuration for an [`AllocatorRuntime`](crate::core::runtime::AllocatorRuntime).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_LOCAL_ORDER, DEFAULT_TRANS_ORDER, MAX_PAGES_PER_POOL, ORDER_MAX, PURGE_INTERVAL,
    PURGE_TIME_AFTER, SHRINK_AGE_MIN,
};

/// Allocator-wide tunables, read once at [`AllocatorRuntime::new`](crate::core::runtime::AllocatorRuntime::new).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Global high watermark, in pages. Acquires above this threshold trigger
    /// a shrink attempt before being admitted.
    pub hi_wmk: usize,

    /// Global low watermark, in pages. Shrinking stops once `total_pages`
    /// falls to or below this value.
    pub lo_wmk: usize,

    /// Interval between purge sweeps of each pool's inactive LRU.
    #[serde(with = "duration_secs")]
    pub purge_interval: Duration,

    /// Minimum idle time before the purge worker reclaims an object.
    #[serde(with = "duration_secs")]
    pub purge_time_after: Duration,

    /// Minimum idle time the shrinker honours under memory pressure.
    #[serde(with = "duration_secs")]
    pub shrink_age_min: Duration,

    /// Maximum pages the shrinker reclaims from a single pool per call.
    pub max_pages_per_pool: usize,

    /// Number of per-order bucket size classes.
    pub order_max: u8,

    /// Order above which `sg_entries`/`trans_tbl` are no longer considered
    /// small enough to lay out inline with the object.
    pub local_order: u8,

    /// Order above which `trans_tbl` alone is no longer considered small
    /// enough to lay out inline with the object.
    pub trans_order: u8,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            hi_wmk: 256 * 1024,
            lo_wmk: 192 * 1024,
            purge_interval: PURGE_INTERVAL,
            purge_time_after: PURGE_TIME_AFTER,
            shrink_age_min: SHRINK_AGE_MIN,
            max_pages_per_pool: MAX_PAGES_PER_POOL,
            order_max: ORDER_MAX,
            local_order: DEFAULT_LOCAL_ORDER,
            trans_order: DEFAULT_TRANS_ORDER,
        }
    }
}

impl AllocatorConfig {
    /// Load configuration from a TOML file, falling back to
    /// [`Default`] values for any field the file omits.
    pub fn load(path: impl AsRef<std::path::Path>) -> crate::types::Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|_| crate::types::AllocError::OutOfMemory)?;
        toml::from_str(&text).map_err(|_| crate::types::AllocError::OutOfMemory)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = AllocatorConfig::default();
        assert!(cfg.lo_wmk < cfg.hi_wmk);
        assert!(cfg.shrink_age_min < cfg.purge_time_after);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = AllocatorConfig::default();
        let text = toml::to_string(&cfg).expect("serialise");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("allocator.toml");
        std::fs::write(&path, text).expect("write");
        let loaded = AllocatorConfig::load(&path).expect("load");
        assert_eq!(loaded.hi_wmk, cfg.hi_wmk);
        assert_eq!(loaded.lo_wmk, cfg.lo_wmk);
    }
}
