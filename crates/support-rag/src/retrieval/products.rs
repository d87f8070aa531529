use anyhow::Result;
use std::sync::Arc;

use crate::context::format_products;
use crate::storage::BackingStore;
use crate::types::ScoredProduct;

/// Nearest-neighbour lookup over the product catalogue.
pub struct ProductRetriever {
    store: Arc<dyn BackingStore>,
    num_candidates: usize,
}

impl ProductRetriever {
    pub fn new(store: Arc<dyn BackingStore>, num_candidates: usize) -> Self {
        Self {
            store,
            num_candidates,
        }
    }

    pub async fn nearest(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<ScoredProduct>> {
        let hits = self
            .store
            .search_products(query_embedding, top_k, self.num_candidates.max(top_k))
            .await?;
        tracing::debug!(hits = hits.len(), top_k, "Product search");
        Ok(hits)
    }

    /// Formatted `Relevant Products:` block for the nearest products.
    pub async fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<String> {
        let hits = self.nearest(query_embedding, top_k).await?;
        Ok(format_products(&hits))
    }
}
