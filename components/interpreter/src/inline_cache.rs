//! Inline caches for property access.
//!
//! One `IcSite` exists per property/index/method site, allocated when the
//! chunk is registered and mutated only on the VM thread. A site moves
//! monomorphic → polymorphic as shapes accumulate; at capacity the
//! least-recently-used entry is evicted. Counters feed the `cache-stats`
//! debug surface.

use arrayvec::ArrayVec;
use core_types::{Shape, ShapeId};
use std::rc::Rc;

/// Maximum shapes cached per site before eviction starts.
pub const POLY_LIMIT: usize = 4;

/// What a cache entry resolves a property to.
#[derive(Debug, Clone)]
pub enum CachedProp {
    /// Plain data slot at this offset.
    Slot(u32),
    /// Adding the key transitions the object to `to` with the value at
    /// `offset`; used by store sites.
    Transition {
        /// Shape after the add.
        to: Rc<Shape>,
        /// Slot offset of the added key.
        offset: u32,
    },
    /// The slot holds an accessor pair; loads call the getter, stores the
    /// setter.
    Accessor(u32),
}

/// One cache entry: a shape and its resolution.
#[derive(Debug, Clone)]
pub struct IcEntry {
    /// The shape this entry is valid for.
    pub shape: ShapeId,
    /// The resolution.
    pub prop: CachedProp,
}

/// One inline-cache site.
#[derive(Debug, Clone, Default)]
pub struct IcSite {
    entries: ArrayVec<IcEntry, POLY_LIMIT>,
    /// Cache hits at this site.
    pub hits: u64,
    /// Cache misses at this site.
    pub misses: u64,
    /// Shape transitions installed at this site.
    pub transitions: u64,
}

impl IcSite {
    /// Creates an empty (cold) site.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up `shape`, counting a hit and refreshing recency on success.
    /// The caller counts the miss (via [`miss`]) only after the slow path
    /// actually runs.
    ///
    /// [`miss`]: IcSite::miss
    pub fn lookup(&mut self, shape: ShapeId) -> Option<CachedProp> {
        let index = self.entries.iter().position(|e| e.shape == shape)?;
        self.hits += 1;
        if index != 0 {
            let entry = self.entries.remove(index);
            self.entries.insert(0, entry);
        }
        Some(self.entries[0].prop.clone())
    }

    /// Counts a miss.
    pub fn miss(&mut self) {
        self.misses += 1;
    }

    /// Installs a resolution for `shape`, evicting the least-recently-used
    /// entry when the site is full.
    pub fn install(&mut self, shape: ShapeId, prop: CachedProp) {
        if matches!(prop, CachedProp::Transition { .. }) {
            self.transitions += 1;
        }
        if let Some(index) = self.entries.iter().position(|e| e.shape == shape) {
            self.entries.remove(index);
        } else if self.entries.is_full() {
            self.entries.pop();
        }
        self.entries.insert(0, IcEntry { shape, prop });
    }

    /// Number of cached shapes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True while the site is cold.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True once at least one lookup or miss has happened here.
    pub fn touched(&self) -> bool {
        self.hits + self.misses > 0
    }
}

/// Aggregated counters across all sites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Sites that have been exercised at least once.
    pub sites: usize,
    /// Total hits.
    pub hits: u64,
    /// Total misses.
    pub misses: u64,
    /// Total installed transitions.
    pub transitions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_site_misses() {
        let mut site = IcSite::new();
        assert!(site.lookup(1).is_none());
        site.miss();
        assert_eq!(site.misses, 1);
        assert!(site.is_empty());
        assert!(site.touched());
    }

    #[test]
    fn test_monomorphic_hit() {
        let mut site = IcSite::new();
        site.install(7, CachedProp::Slot(0));
        assert!(matches!(site.lookup(7), Some(CachedProp::Slot(0))));
        assert_eq!(site.hits, 1);
        assert!(site.lookup(8).is_none());
    }

    #[test]
    fn test_lru_eviction() {
        let mut site = IcSite::new();
        for shape in 0..POLY_LIMIT {
            site.install(shape, CachedProp::Slot(shape as u32));
        }
        // Touch shape 0 so it is most recent, then overflow.
        assert!(site.lookup(0).is_some());
        site.install(99, CachedProp::Slot(9));
        assert_eq!(site.len(), POLY_LIMIT);
        assert!(site.lookup(0).is_some());
        assert!(site.lookup(99).is_some());
        // Shape 1 was least recently used and got evicted.
        assert!(site.lookup(1).is_none());
    }

    #[test]
    fn test_transition_counter() {
        let mut site = IcSite::new();
        let table = core_types::ShapeTable::new();
        site.install(
            0,
            CachedProp::Transition {
                to: table.root(),
                offset: 0,
            },
        );
        assert_eq!(site.transitions, 1);
    }
}
