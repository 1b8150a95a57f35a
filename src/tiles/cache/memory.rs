use std::num::NonZeroUsize;

use lru::LruCache;

use super::CacheKey;
use crate::tiles::source::TileImage;

/// In-memory tier: bounded LRU of tiles keyed by (source, address)
#[derive(Debug)]
pub struct MemoryTier {
    cache: LruCache<CacheKey, TileImage>,
    bytes: usize,
}

impl MemoryTier {
    /// Create a new tier with the given capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            bytes: 0,
        }
    }

    /// Get a tile and mark it most recently used
    pub fn get(&mut self, key: &CacheKey) -> Option<TileImage> {
        self.cache.get(key).cloned()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.contains(key)
    }

    /// Insert a tile, returning the entry evicted to make room, if any
    pub fn insert(&mut self, key: CacheKey, image: TileImage) -> Option<CacheKey> {
        self.bytes += image.len();
        match self.cache.push(key.clone(), image) {
            Some((old_key, old)) => {
                self.bytes = self.bytes.saturating_sub(old.len());
                // push returns the replaced value for an existing key
                if old_key == key {
                    None
                } else {
                    Some(old_key)
                }
            }
            None => None,
        }
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<TileImage> {
        let removed = self.cache.pop(key);
        if let Some(image) = &removed {
            self.bytes = self.bytes.saturating_sub(image.len());
        }
        removed
    }

    /// Drop every tile belonging to `source_id`, returning how many were removed
    pub fn remove_source(&mut self, source_id: &str) -> usize {
        let keys: Vec<CacheKey> = self
            .cache
            .iter()
            .filter(|(key, _)| &*key.source_id == source_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }

    /// Encoded bytes currently held
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::TileAddress;

    fn key(source: &str, x: u32) -> CacheKey {
        CacheKey::new(source.into(), TileAddress::new(x, 0, 4))
    }

    fn image() -> TileImage {
        TileImage::solid(4, [1, 2, 3, 255]).unwrap()
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut tier = MemoryTier::new(2);
        assert!(tier.insert(key("a", 1), image()).is_none());
        assert!(tier.insert(key("a", 2), image()).is_none());

        // Touch 1 so 2 becomes the eviction candidate
        assert!(tier.get(&key("a", 1)).is_some());
        let evicted = tier.insert(key("a", 3), image());
        assert_eq!(evicted, Some(key("a", 2)));
        assert!(tier.contains(&key("a", 1)));
        assert!(tier.contains(&key("a", 3)));
    }

    #[test]
    fn test_replace_keeps_byte_count() {
        let mut tier = MemoryTier::new(4);
        tier.insert(key("a", 1), image());
        let bytes = tier.bytes();
        assert!(tier.insert(key("a", 1), image()).is_none());
        assert_eq!(tier.bytes(), bytes);
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_remove_source_only_touches_that_source() {
        let mut tier = MemoryTier::new(8);
        tier.insert(key("a", 1), image());
        tier.insert(key("a", 2), image());
        tier.insert(key("b", 1), image());

        assert_eq!(tier.remove_source("a"), 2);
        assert_eq!(tier.len(), 1);
        assert!(tier.contains(&key("b", 1)));

        tier.clear();
        assert!(tier.is_empty());
        assert_eq!(tier.bytes(), 0);
    }
}
