//! `(text hash -> embedding)` cache with bounded memory.

use lru::LruCache;
use quarry_protocol::idempotency::text_hash;
use std::num::NonZeroUsize;

/// Default capacity; at 384-dim f32 vectors this stays under ~25 MB.
const DEFAULT_CAPACITY: usize = 16_384;

pub struct EmbeddingCache {
    entries: LruCache<String, Vec<f32>>,
    hits: u64,
    misses: u64,
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl EmbeddingCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("non-zero cache capacity"),
            ),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up the embedding for `text`, tracking hit statistics.
    pub fn get(&mut self, text: &str) -> Option<Vec<f32>> {
        let key = text_hash(text);
        match self.entries.get(&key) {
            Some(vector) => {
                self.hits += 1;
                Some(vector.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn put(&mut self, text: &str, embedding: Vec<f32>) {
        self.entries.put(text_hash(text), embedding);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_text_hits_the_cache() {
        let mut cache = EmbeddingCache::with_capacity(8);
        cache.put("What is 2 + 2?", vec![1.0, 0.0]);
        assert_eq!(cache.get("What is 2 + 2?").unwrap(), vec![1.0, 0.0]);
        // Whitespace and case changes hash to the same key.
        assert!(cache.get("what  is 2 + 2?").is_some());
        assert!(cache.get("what is 2 + 3?").is_none());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let mut cache = EmbeddingCache::with_capacity(2);
        cache.put("a", vec![1.0]);
        cache.put("b", vec![2.0]);
        let _ = cache.get("a");
        cache.put("c", vec![3.0]);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert_eq!(cache.len(), 2);
    }
}
