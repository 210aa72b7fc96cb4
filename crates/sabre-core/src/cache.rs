// this_file: crates/sabre-core/src/cache.rs

//! Content-addressed caches.
//!
//! Four caches sit under the pipeline: font, outline, bitmap and
//! composite. Each deduplicates an expensive artifact under a hashable
//! key with construct-on-miss semantics. Values are `Arc`-shared;
//! trimming walks least-recently-used entries first and only retires
//! entries nothing else still references.

use std::hash::Hash;
use std::sync::Arc;

use lru::LruCache;

use crate::compose::{CompositeKey, CompositeValue};
use crate::font::Face;
use crate::outline::{OutlineKey, OutlineValue};
use crate::quant::BitmapKey;
use sabre_raster::Bitmap;

/// Retained-size contribution of a cached value (raster + metadata).
pub trait CacheValue {
    fn size(&self) -> usize;
}

/// LRU cache with construct-on-miss and reference-aware trimming.
pub struct Cache<K: Hash + Eq + Clone, V: CacheValue> {
    map: LruCache<K, Arc<V>>,
    total: usize,
    hits: u64,
    misses: u64,
}

impl<K: Hash + Eq + Clone, V: CacheValue> Cache<K, V> {
    pub fn new() -> Self {
        Self {
            map: LruCache::unbounded(),
            total: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up `key`, invoking `construct` on a miss. The constructed
    /// value is retained even when marked invalid, so repeated failures
    /// stay cheap.
    pub fn get_or_insert_with(&mut self, key: &K, construct: impl FnOnce() -> V) -> Arc<V> {
        if let Some(v) = self.map.get(key) {
            self.hits += 1;
            return v.clone();
        }
        self.misses += 1;
        let v = Arc::new(construct());
        self.total += v.size();
        self.map.put(key.clone(), v.clone());
        v
    }

    pub fn get(&mut self, key: &K) -> Option<Arc<V>> {
        self.map.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Aggregate retained size in bytes.
    pub fn total_size(&self) -> usize {
        self.total
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Evict unreferenced entries, LRU first, until at most `max`
    /// entries remain.
    pub fn cut_count(&mut self, max: usize) {
        if self.map.len() <= max {
            return;
        }
        for key in self.evictable() {
            if self.map.len() <= max {
                break;
            }
            self.remove(&key);
        }
    }

    /// Evict unreferenced entries, LRU first, until the aggregate size
    /// is at most `max_bytes`.
    pub fn cut_size(&mut self, max_bytes: usize) {
        if self.total <= max_bytes {
            return;
        }
        for key in self.evictable() {
            if self.total <= max_bytes {
                break;
            }
            self.remove(&key);
        }
    }

    fn evictable(&self) -> Vec<K> {
        // iter() walks MRU→LRU; trim wants the opposite order.
        let mut keys: Vec<K> = self
            .map
            .iter()
            .filter(|(_, v)| Arc::strong_count(v) == 1)
            .map(|(k, _)| k.clone())
            .collect();
        keys.reverse();
        keys
    }

    fn remove(&mut self, key: &K) {
        if let Some(v) = self.map.pop(key) {
            self.total -= v.size();
        }
    }
}

impl<K: Hash + Eq + Clone, V: CacheValue> Default for Cache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Font cache value: a resolved face, or a cached lookup failure.
pub struct FontEntry {
    pub face: Option<Arc<dyn Face>>,
}

impl CacheValue for FontEntry {
    fn size(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}

/// Glyph/border bitmap cache value; `None` raster means construction
/// was rejected and the cluster renders empty.
pub struct BitmapValue {
    pub bitmap: Option<Bitmap>,
}

impl CacheValue for BitmapValue {
    fn size(&self) -> usize {
        std::mem::size_of::<BitmapKey>()
            + std::mem::size_of::<Self>()
            + self.bitmap.as_ref().map_or(0, |b| b.size())
    }
}

/// The outline cache is bounded by entry count, bitmap and composite
/// caches by byte footprint.
pub const OUTLINE_CACHE_MAX_ITEMS: usize = 10_000;
pub const BITMAP_CACHE_MAX_SIZE: usize = 64 * 1024 * 1024;
pub const COMPOSITE_CACHE_MAX_SIZE: usize = 32 * 1024 * 1024;
pub const FONT_CACHE_MAX_ITEMS: usize = 256;

pub struct Caches {
    pub font: Cache<crate::font::FontDesc, FontEntry>,
    pub outline: Cache<OutlineKey, OutlineValue>,
    pub bitmap: Cache<BitmapKey, BitmapValue>,
    pub composite: Cache<CompositeKey, CompositeValue>,
}

impl Caches {
    pub fn new() -> Self {
        Self {
            font: Cache::new(),
            outline: Cache::new(),
            bitmap: Cache::new(),
            composite: Cache::new(),
        }
    }

    /// Frame-start trim back to the configured bounds.
    pub fn trim(&mut self) {
        self.composite.cut_size(COMPOSITE_CACHE_MAX_SIZE);
        self.bitmap.cut_size(BITMAP_CACHE_MAX_SIZE);
        self.outline.cut_count(OUTLINE_CACHE_MAX_ITEMS);
        self.font.cut_count(FONT_CACHE_MAX_ITEMS);
    }
}

impl Default for Caches {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Blob(usize);

    impl CacheValue for Blob {
        fn size(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn construct_on_miss_then_hit() {
        let mut cache: Cache<u32, Blob> = Cache::new();
        let mut built = 0;
        let a = cache.get_or_insert_with(&1, || {
            built += 1;
            Blob(10)
        });
        let b = cache.get_or_insert_with(&1, || {
            built += 1;
            Blob(10)
        });
        assert_eq!(built, 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.total_size(), 10);
        assert!(cache.hit_rate() > 0.0);
    }

    #[test]
    fn cut_size_evicts_lru_first() {
        let mut cache: Cache<u32, Blob> = Cache::new();
        for k in 0..4 {
            cache.get_or_insert_with(&k, || Blob(100));
        }
        // Touch 0 so 1 becomes the LRU entry.
        cache.get(&0);
        cache.cut_size(250);
        assert!(cache.get(&0).is_some());
        assert!(cache.get(&1).is_none());
        assert!(cache.total_size() <= 250);
    }

    #[test]
    fn referenced_entries_survive_trim() {
        let mut cache: Cache<u32, Blob> = Cache::new();
        let held = cache.get_or_insert_with(&1, || Blob(100));
        cache.get_or_insert_with(&2, || Blob(100));
        cache.cut_size(0);
        // Entry 1 is still referenced by `held`, entry 2 is gone.
        assert!(cache.get(&1).is_some());
        assert!(cache.get(&2).is_none());
        drop(held);
        cache.cut_size(0);
        assert!(cache.is_empty());
    }

    #[test]
    fn cut_count_bounds_entries() {
        let mut cache: Cache<u32, Blob> = Cache::new();
        for k in 0..10 {
            cache.get_or_insert_with(&k, || Blob(1));
        }
        cache.cut_count(3);
        assert_eq!(cache.len(), 3);
        // The three most recent survive.
        for k in 7..10 {
            assert!(cache.get(&k).is_some());
        }
    }
}
