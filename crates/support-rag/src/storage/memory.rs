use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::HashMap;

use super::{has_any_category, most_recent, BackingStore};
use crate::embeddings::cosine_similarity;
use crate::search::FaqTextIndex;
use crate::types::{
    CustomerId, FaqRecord, ProductRecord, PurchaseRecord, RouteCentroidDoc, RouteTable,
    ScoredProduct, ScoredPurchase,
};

/// In-process store with exhaustive cosine search. Used for tests, demos and
/// small catalogues that fit in memory.
pub struct MemoryStore {
    purchases: Vec<PurchaseRecord>,
    products: Vec<ProductRecord>,
    faqs: Vec<FaqRecord>,
    faq_index: FaqTextIndex,
    centroids: HashMap<RouteTable, Vec<RouteCentroidDoc>>,
}

impl MemoryStore {
    pub fn new(
        purchases: Vec<PurchaseRecord>,
        products: Vec<ProductRecord>,
        faqs: Vec<FaqRecord>,
    ) -> Result<Self> {
        let faq_index = FaqTextIndex::build(
            faqs.iter()
                .map(|f| (f.question.as_str(), f.keywords.as_slice())),
        )?;

        tracing::debug!(
            purchases = purchases.len(),
            products = products.len(),
            faqs = faqs.len(),
            "Created in-memory store"
        );

        Ok(Self {
            purchases,
            products,
            faqs,
            faq_index,
            centroids: HashMap::new(),
        })
    }

    pub fn with_centroids(mut self, table: RouteTable, docs: Vec<RouteCentroidDoc>) -> Self {
        self.centroids.insert(table, docs);
        self
    }

    fn customer_purchases(&self, customer_id: CustomerId) -> impl Iterator<Item = &PurchaseRecord> {
        self.purchases
            .iter()
            .filter(move |p| p.customer_id == customer_id)
    }
}

fn rank<T>(mut scored: Vec<(T, f32)>, top_k: usize) -> Vec<(T, f32)> {
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn purchases_for_customer(&self, customer_id: CustomerId) -> Result<Vec<PurchaseRecord>> {
        Ok(self.customer_purchases(customer_id).cloned().collect())
    }

    async fn search_purchases(
        &self,
        customer_id: CustomerId,
        query_embedding: &[f32],
        top_k: usize,
        _num_candidates: usize,
    ) -> Result<Vec<ScoredPurchase>> {
        let scored = self
            .customer_purchases(customer_id)
            .filter(|p| !p.embedding.is_empty())
            .map(|p| (p, cosine_similarity(query_embedding, &p.embedding)))
            .collect();
        Ok(rank(scored, top_k)
            .into_iter()
            .map(|(p, score)| ScoredPurchase {
                record: p.clone(),
                score,
            })
            .collect())
    }

    async fn purchases_by_tracking(
        &self,
        customer_id: CustomerId,
        tracking_number: &str,
    ) -> Result<Vec<PurchaseRecord>> {
        Ok(self
            .customer_purchases(customer_id)
            .filter(|p| p.tracking_number == tracking_number)
            .cloned()
            .collect())
    }

    async fn latest_purchase(&self, customer_id: CustomerId) -> Result<Option<PurchaseRecord>> {
        Ok(most_recent(self.customer_purchases(customer_id)))
    }

    async fn latest_purchase_between(
        &self,
        customer_id: CustomerId,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<PurchaseRecord>> {
        Ok(most_recent(
            self.customer_purchases(customer_id)
                .filter(|p| p.order_date >= start && p.order_date < end),
        ))
    }

    async fn search_products(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        _num_candidates: usize,
    ) -> Result<Vec<ScoredProduct>> {
        let scored = self
            .products
            .iter()
            .filter(|p| !p.embedding.is_empty())
            .map(|p| (p, cosine_similarity(query_embedding, &p.embedding)))
            .collect();
        Ok(rank(scored, top_k)
            .into_iter()
            .map(|(p, score)| ScoredProduct {
                record: p.clone(),
                score,
            })
            .collect())
    }

    async fn text_search_faqs(&self, query: &str, limit: usize) -> Result<Vec<FaqRecord>> {
        let hits = self.faq_index.search(query, limit)?;
        Ok(hits
            .into_iter()
            .filter_map(|(id, _)| self.faqs.get(id).cloned())
            .collect())
    }

    async fn list_faqs(
        &self,
        categories: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<FaqRecord>> {
        Ok(self
            .faqs
            .iter()
            .filter(|f| has_any_category(f, categories))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn route_centroids(&self, table: RouteTable) -> Result<Vec<RouteCentroidDoc>> {
        Ok(self.centroids.get(&table).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2011, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn purchase(tracking: &str, customer: CustomerId, date: NaiveDateTime, emb: Vec<f32>) -> PurchaseRecord {
        PurchaseRecord {
            tracking_number: tracking.to_string(),
            stock_code: "A1".to_string(),
            title: "ITEM".to_string(),
            quantity: 1,
            unit_price: 1.0,
            order_date: date,
            delivery_date: None,
            address: String::new(),
            customer_id: customer,
            embedding: emb,
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::new(
            vec![
                purchase("100001", 1, at(1, 9), vec![1.0, 0.0]),
                purchase("100002", 1, at(3, 9), vec![0.0, 1.0]),
                purchase("100003", 1, at(3, 15), vec![0.7, 0.7]),
                purchase("200001", 2, at(5, 9), vec![1.0, 0.0]),
            ],
            Vec::new(),
            vec![FaqRecord {
                question: "What is your return policy?".to_string(),
                answer: "30 days.".to_string(),
                embedding: vec![1.0, 0.0],
                categories: vec!["returns".to_string()],
                keywords: vec!["return".to_string()],
            }],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_purchase_queries_are_customer_scoped() {
        let store = store();
        assert_eq!(store.purchases_for_customer(1).await.unwrap().len(), 3);
        assert!(store.purchases_by_tracking(1, "200001").await.unwrap().is_empty());

        let hits = store.search_purchases(1, &[1.0, 0.0], 10, 50).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].record.tracking_number, "100001");
    }

    #[tokio::test]
    async fn test_latest_purchase_and_day_window() {
        let store = store();
        let latest = store.latest_purchase(1).await.unwrap().unwrap();
        assert_eq!(latest.tracking_number, "100003");

        let on_first = store
            .latest_purchase_between(1, at(1, 0), at(2, 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(on_first.tracking_number, "100001");
        assert!(store
            .latest_purchase_between(1, at(10, 0), at(11, 0))
            .await
            .unwrap()
            .is_none());
        assert!(store.latest_purchase(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_faq_listing_and_text_search() {
        let store = store();
        let returns = vec!["returns".to_string()];
        let shipping = vec!["shipping".to_string()];
        assert_eq!(store.list_faqs(Some(&returns), Some(20)).await.unwrap().len(), 1);
        assert!(store.list_faqs(Some(&shipping), None).await.unwrap().is_empty());
        assert_eq!(store.text_search_faqs("returns", 15).await.unwrap().len(), 1);
        assert!(store.route_centroids(RouteTable::Collection).await.unwrap().is_empty());
    }
}
