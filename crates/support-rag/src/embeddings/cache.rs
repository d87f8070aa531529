use anyhow::Result;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::Arc;

use super::Embedder;

/// LRU memoisation in front of another embedder. Routing and FAQ re-ranking
/// embed the same query more than once per turn, so hits are common.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: RwLock<lru::LruCache<String, Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: RwLock::new(lru::LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

impl Embedder for CachedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.cache.write().get(text) {
            return Ok(cached.clone());
        }
        let embedding = self.inner.embed(text)?;
        self.cache.write().put(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}
