pub mod lance_store;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::types::{
    CustomerId, FaqRecord, PurchaseRecord, RouteCentroidDoc, RouteTable, ScoredProduct,
    ScoredPurchase,
};

pub use lance_store::LanceStore;
pub use memory::MemoryStore;

/// Read access to the document collections the retrievers draw from.
///
/// Purchase queries are always scoped to one customer. Vector searches take
/// a candidate pool size in addition to `top_k`; stores that search
/// exhaustively may ignore it.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Every purchase line item for the customer.
    async fn purchases_for_customer(&self, customer_id: CustomerId) -> Result<Vec<PurchaseRecord>>;

    async fn search_purchases(
        &self,
        customer_id: CustomerId,
        query_embedding: &[f32],
        top_k: usize,
        num_candidates: usize,
    ) -> Result<Vec<ScoredPurchase>>;

    /// Line items of one invoice, in stored order.
    async fn purchases_by_tracking(
        &self,
        customer_id: CustomerId,
        tracking_number: &str,
    ) -> Result<Vec<PurchaseRecord>>;

    /// The customer's most recent line item by order date.
    async fn latest_purchase(&self, customer_id: CustomerId) -> Result<Option<PurchaseRecord>>;

    /// Most recent line item with `start <= order_date < end`.
    async fn latest_purchase_between(
        &self,
        customer_id: CustomerId,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<PurchaseRecord>>;

    async fn search_products(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        num_candidates: usize,
    ) -> Result<Vec<ScoredProduct>>;

    /// Keyword search over FAQ questions and keywords, best first.
    async fn text_search_faqs(&self, query: &str, limit: usize) -> Result<Vec<FaqRecord>>;

    /// FAQs carrying any of `categories` (all when `None`), up to `limit`.
    async fn list_faqs(
        &self,
        categories: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<FaqRecord>>;

    async fn route_centroids(&self, table: RouteTable) -> Result<Vec<RouteCentroidDoc>>;
}

/// Category membership test shared by the store implementations.
pub(crate) fn has_any_category(faq: &FaqRecord, categories: Option<&[String]>) -> bool {
    match categories {
        None => true,
        Some(wanted) => faq.categories.iter().any(|c| wanted.contains(c)),
    }
}

/// Latest by order date; the first stored record wins ties.
pub(crate) fn most_recent<'a>(
    records: impl Iterator<Item = &'a PurchaseRecord>,
) -> Option<PurchaseRecord> {
    records
        .fold(None::<&PurchaseRecord>, |best, p| match best {
            Some(b) if b.order_date >= p.order_date => Some(b),
            _ => Some(p),
        })
        .cloned()
}
