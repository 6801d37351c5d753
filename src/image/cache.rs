use image::DynamicImage;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// One cached decode with its accounted cost
struct CachedImage {
    image: Arc<DynamicImage>,
    cost: usize,
}

/// Bounded in-memory cache of decoded images, keyed by blob id
///
/// Bounded two ways: an entry-count limit (enforced by the LRU map's
/// capacity) and a total decoded-byte budget. Insertion evicts
/// least-recently-used entries until both limits hold. The cache is a
/// pure optimization - every entry can be rebuilt from the blob store,
/// so dropping entries never loses data.
///
/// Safe for concurrent use; when two callers race to decode the same
/// blob, whichever result lands last wins (both are byte-identical
/// reconstructions, so either is fine).
pub struct DecodedImageCache {
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    entries: LruCache<Uuid, CachedImage>,
    total_cost: usize,
    max_cost: usize,
}

impl DecodedImageCache {
    /// Create a cache bounded by `max_entries` and `max_cost_bytes`
    pub fn new(max_entries: NonZeroUsize, max_cost_bytes: usize) -> Self {
        DecodedImageCache {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(max_entries),
                total_cost: 0,
                max_cost: max_cost_bytes,
            }),
        }
    }

    /// Look up a decoded image, bumping its recency
    pub fn get(&self, id: Uuid) -> Option<Arc<DynamicImage>> {
        let mut inner = self.inner.lock().ok()?;
        inner.entries.get(&id).map(|e| Arc::clone(&e.image))
    }

    /// Insert a decoded image with its cost estimate, evicting
    /// least-recently-used entries until both limits hold
    ///
    /// An image whose cost alone exceeds the budget is not cached.
    pub fn put(&self, id: Uuid, image: Arc<DynamicImage>, cost: usize) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        if cost > inner.max_cost {
            log::debug!(
                "Not caching {} byte decode for blob {} (budget {})",
                cost,
                id,
                inner.max_cost
            );
            return;
        }

        // push returns the same-key replacement or the entry evicted
        // by the count limit; either way its cost leaves the total
        if let Some((_, dropped)) = inner.entries.push(id, CachedImage { image, cost }) {
            inner.total_cost -= dropped.cost;
        }
        inner.total_cost += cost;

        while inner.total_cost > inner.max_cost {
            match inner.entries.pop_lru() {
                Some((evicted_id, evicted)) => {
                    inner.total_cost -= evicted.cost;
                    log::debug!("Evicted blob {} decode from image cache", evicted_id);
                }
                None => break,
            }
        }
    }

    /// Drop the cached decode for `id`, if any
    pub fn invalidate(&self, id: Uuid) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if let Some(dropped) = inner.entries.pop(&id) {
            inner.total_cost -= dropped.cost;
        }
    }

    /// Drop every cached decode
    pub fn clear(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.entries.clear();
        inner.total_cost = 0;
    }

    /// Number of cached decodes
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accounted cost of all cached decodes
    pub fn cost(&self) -> usize {
        self.inner.lock().map(|inner| inner.total_cost).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_of(cost_px: u32) -> Arc<DynamicImage> {
        Arc::new(DynamicImage::new_rgba8(cost_px, 1))
    }

    fn cache(entries: usize, max_cost: usize) -> DecodedImageCache {
        DecodedImageCache::new(NonZeroUsize::new(entries).unwrap(), max_cost)
    }

    #[test]
    fn test_get_returns_cached_image() {
        let cache = cache(4, 1024);
        let id = Uuid::new_v4();
        cache.put(id, image_of(2), 8);

        let hit = cache.get(id).unwrap();
        assert_eq!(hit.width(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.cost(), 8);
    }

    #[test]
    fn test_count_limit_evicts_least_recently_used() {
        let cache = cache(2, 1024);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        cache.put(a, image_of(1), 4);
        cache.put(b, image_of(1), 4);

        // Touch a so b becomes the eviction candidate
        assert!(cache.get(a).is_some());
        cache.put(c, image_of(1), 4);

        assert!(cache.get(a).is_some());
        assert!(cache.get(b).is_none());
        assert!(cache.get(c).is_some());
        assert_eq!(cache.cost(), 8);
    }

    #[test]
    fn test_cost_limit_evicts_until_within_budget() {
        let cache = cache(10, 100);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        cache.put(a, image_of(1), 40);
        cache.put(b, image_of(1), 40);
        cache.put(c, image_of(1), 40);

        // a was least recently used and had to go
        assert!(cache.get(a).is_none());
        assert!(cache.get(b).is_some());
        assert!(cache.get(c).is_some());
        assert_eq!(cache.cost(), 80);
    }

    #[test]
    fn test_oversized_entry_is_not_cached() {
        let cache = cache(4, 10);
        let id = Uuid::new_v4();
        cache.put(id, image_of(1), 11);

        assert!(cache.get(id).is_none());
        assert_eq!(cache.cost(), 0);
    }

    #[test]
    fn test_same_key_replacement_keeps_cost_accurate() {
        let cache = cache(4, 100);
        let id = Uuid::new_v4();
        cache.put(id, image_of(1), 30);
        cache.put(id, image_of(2), 50);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.cost(), 50);
    }

    #[test]
    fn test_invalidate_drops_entry_and_cost() {
        let cache = cache(4, 100);
        let id = Uuid::new_v4();
        cache.put(id, image_of(1), 30);

        cache.invalidate(id);
        assert!(cache.get(id).is_none());
        assert_eq!(cache.cost(), 0);

        // Invalidating an absent id is a no-op
        cache.invalidate(Uuid::new_v4());
    }

    #[test]
    fn test_clear_empties_cache() {
        let cache = cache(4, 100);
        cache.put(Uuid::new_v4(), image_of(1), 10);
        cache.put(Uuid::new_v4(), image_of(1), 10);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.cost(), 0);
    }
}
