use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Thread-safe LRU cache for question embeddings.
///
/// Repeated questions (and agent retries within a session) skip the
/// embedding API entirely.
pub struct EmbeddingCache {
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("Cache capacity must be at least 1");
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        self.cache.lock().unwrap().get(text).cloned()
    }

    pub fn put(&self, text: String, embedding: Vec<f32>) {
        self.cache.lock().unwrap().put(text, embedding);
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_put_and_get() {
        let cache = EmbeddingCache::new(10);
        cache.put("test question".to_string(), vec![1.0, 2.0, 3.0]);

        let retrieved = cache.get("test question");
        assert_eq!(retrieved, Some(vec![1.0, 2.0, 3.0]));
        assert!(cache.get("other question").is_none());
    }

    #[test]
    fn test_cache_eviction() {
        let cache = EmbeddingCache::new(2);
        cache.put("q1".to_string(), vec![1.0]);
        cache.put("q2".to_string(), vec![2.0]);
        cache.put("q3".to_string(), vec![3.0]);

        assert!(cache.get("q1").is_none()); // evicted (LRU)
        assert!(cache.get("q2").is_some());
        assert!(cache.get("q3").is_some());
    }

    #[test]
    fn test_cache_get_updates_lru() {
        let cache = EmbeddingCache::new(2);
        cache.put("q1".to_string(), vec![1.0]);
        cache.put("q2".to_string(), vec![2.0]);

        let _ = cache.get("q1");
        cache.put("q3".to_string(), vec![3.0]);

        assert!(cache.get("q1").is_some()); // recently accessed, kept
        assert!(cache.get("q2").is_none()); // evicted
        assert_eq!(cache.len(), 2);
    }
}
