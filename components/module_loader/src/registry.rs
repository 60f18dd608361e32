//! The module registry.
//!
//! Owns every record for the lifetime of a session. Shared between the main
//! loop and parse workers; one read/write lock protects all fields.

use crate::record::ModuleRecord;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum records before the oldest is evicted.
    pub cache_size: usize,
    /// Entry time-to-live; `None` disables expiry.
    pub ttl: Option<Duration>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cache_size: 256,
            ttl: None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<PathBuf, ModuleRecord>,
    hits: u64,
    misses: u64,
}

/// Path-keyed store of module records with TTL expiry and size-capped
/// eviction.
#[derive(Debug)]
pub struct ModuleRegistry {
    inner: RwLock<Inner>,
    config: RegistryConfig,
}

impl ModuleRegistry {
    /// Creates a registry with the given config.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            config,
        }
    }

    /// Inserts (or replaces) a record, evicting the oldest entry when the
    /// cache is over capacity.
    pub fn insert(&self, record: ModuleRecord) {
        let mut inner = self.inner.write();
        if !inner.records.contains_key(&record.path) && inner.records.len() >= self.config.cache_size
        {
            if let Some(oldest) = inner
                .records
                .values()
                .min_by_key(|r| r.loaded_at)
                .map(|r| r.path.clone())
            {
                log::debug!("registry evicting {}", oldest.display());
                inner.records.remove(&oldest);
            }
        }
        inner.records.insert(record.path.clone(), record);
    }

    /// Clones the record for `path`, honoring TTL expiry (an expired entry
    /// is removed and counted as a miss).
    pub fn get(&self, path: &Path) -> Option<ModuleRecord> {
        let mut inner = self.inner.write();
        let expired = match (inner.records.get(path), self.config.ttl) {
            (Some(record), Some(ttl)) => record.loaded_at.elapsed() > ttl,
            _ => false,
        };
        if expired {
            inner.records.remove(path);
            inner.misses += 1;
            return None;
        }
        match inner.records.get(path).cloned() {
            Some(record) => {
                inner.hits += 1;
                Some(record)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Runs `f` on the record for `path`, if present.
    pub fn with_record_mut<R>(
        &self,
        path: &Path,
        f: impl FnOnce(&mut ModuleRecord) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.write();
        inner.records.get_mut(path).map(f)
    }

    /// True when a record exists for `path` (no counters touched).
    pub fn contains(&self, path: &Path) -> bool {
        self.inner.read().records.contains_key(path)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// True when no records exist.
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// `(hits, misses)` counters.
    pub fn stats(&self) -> (u64, u64) {
        let inner = self.inner.read();
        (inner.hits, inner.misses)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_hit_and_miss_counters() {
        let registry = ModuleRegistry::default();
        registry.insert(ModuleRecord::new("./a", "/a.ts"));
        assert!(registry.get(Path::new("/a.ts")).is_some());
        assert!(registry.get(Path::new("/b.ts")).is_none());
        assert_eq!(registry.stats(), (1, 1));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let registry = ModuleRegistry::new(RegistryConfig {
            cache_size: 2,
            ttl: None,
        });
        registry.insert(ModuleRecord::new("./a", "/a.ts"));
        std::thread::sleep(Duration::from_millis(2));
        registry.insert(ModuleRecord::new("./b", "/b.ts"));
        std::thread::sleep(Duration::from_millis(2));
        registry.insert(ModuleRecord::new("./c", "/c.ts"));
        assert_eq!(registry.len(), 2);
        assert!(!registry.contains(Path::new("/a.ts")));
        assert!(registry.contains(Path::new("/c.ts")));
    }

    #[test]
    fn test_ttl_expires_entries() {
        let registry = ModuleRegistry::new(RegistryConfig {
            cache_size: 16,
            ttl: Some(Duration::from_millis(1)),
        });
        registry.insert(ModuleRecord::new("./a", "/a.ts"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(registry.get(Path::new("/a.ts")).is_none());
        let (hits, misses) = registry.stats();
        assert_eq!(hits, 0);
        assert_eq!(misses, 1);
    }
}
