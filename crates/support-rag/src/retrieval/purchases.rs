use anyhow::Result;
use chrono::{Local, NaiveDate};
use std::collections::HashSet;
use std::sync::Arc;

use super::invoice::{extract_date, extract_invoice_number};
use crate::config::RetrievalConfig;
use crate::context::{format_item_aggregates, format_order};
use crate::routing::PurchaseRoute;
use crate::storage::BackingStore;
use crate::types::{CustomerId, ItemAggregate, PurchaseRecord};

/// Roll line items up per title, most recent order first.
pub fn build_aggregates(records: &[PurchaseRecord]) -> Vec<ItemAggregate> {
    let mut sorted: Vec<&PurchaseRecord> = records.iter().collect();
    sorted.sort_by(|a, b| b.order_date.cmp(&a.order_date));

    let mut aggregates: Vec<ItemAggregate> = Vec::new();
    for record in sorted {
        match aggregates.iter_mut().find(|a| a.title == record.title) {
            Some(agg) => {
                agg.total_spent += record.line_total();
                agg.total_quantity += record.quantity;
                if !agg.tracking_numbers.contains(&record.tracking_number) {
                    agg.tracking_numbers.push(record.tracking_number.clone());
                }
            }
            None => aggregates.push(ItemAggregate {
                title: record.title.clone(),
                stock_code: record.stock_code.clone(),
                most_recent_order: record.order_date,
                most_recent_tracking_number: record.tracking_number.clone(),
                total_spent: record.line_total(),
                total_quantity: record.quantity,
                tracking_numbers: vec![record.tracking_number.clone()],
            }),
        }
    }

    for agg in &mut aggregates {
        agg.total_spent = (agg.total_spent * 100.0).round() / 100.0;
    }
    aggregates
}

/// Per-session purchase retrieval for one customer.
///
/// The item aggregate table is computed once at construction and never
/// updated; orders placed mid-session are only visible to order lookups.
pub struct PurchaseRetriever {
    store: Arc<dyn BackingStore>,
    customer_id: CustomerId,
    aggregates: Vec<ItemAggregate>,
    config: RetrievalConfig,
}

impl PurchaseRetriever {
    /// Load the customer's purchase history and build the aggregate table.
    pub async fn load(
        store: Arc<dyn BackingStore>,
        customer_id: CustomerId,
        config: RetrievalConfig,
    ) -> Result<Self> {
        let records = store.purchases_for_customer(customer_id).await?;
        Ok(Self::from_records(store, customer_id, &records, config))
    }

    pub fn from_records(
        store: Arc<dyn BackingStore>,
        customer_id: CustomerId,
        records: &[PurchaseRecord],
        config: RetrievalConfig,
    ) -> Self {
        let aggregates = build_aggregates(records);
        tracing::debug!(
            customer_id,
            line_items = records.len(),
            items = aggregates.len(),
            "Built purchase aggregates"
        );
        Self {
            store,
            customer_id,
            aggregates,
            config,
        }
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn aggregates(&self) -> &[ItemAggregate] {
        &self.aggregates
    }

    /// Dispatch to the strategy chosen by the purchase router.
    pub async fn search(
        &self,
        route: PurchaseRoute,
        query: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<String> {
        match route {
            PurchaseRoute::ItemBased => self.item_based(query, query_embedding, top_k).await,
            PurchaseRoute::OrderBased => self.order_based(query).await,
        }
    }

    /// Aggregated history for the items nearest to the query.
    pub async fn item_based(&self, query: &str, query_embedding: &[f32], top_k: usize) -> Result<String> {
        let hits = self
            .store
            .search_purchases(
                self.customer_id,
                query_embedding,
                top_k,
                self.config.purchase_candidates,
            )
            .await?;

        let titles: HashSet<&str> = hits.iter().map(|h| h.record.title.as_str()).collect();
        let matching: Vec<&ItemAggregate> = self
            .aggregates
            .iter()
            .filter(|a| titles.contains(a.title.as_str()))
            .collect();

        tracing::debug!(
            customer_id = self.customer_id,
            query = %query,
            hits = hits.len(),
            items = matching.len(),
            "Item-based purchase lookup"
        );
        Ok(format_item_aggregates(
            &matching,
            self.config.tracking_display_limit,
        ))
    }

    pub async fn order_based(&self, query: &str) -> Result<String> {
        self.order_based_at(query, Local::now().date_naive()).await
    }

    /// Order lookup with an explicit reference date for relative phrases.
    pub async fn order_based_at(&self, query: &str, today: NaiveDate) -> Result<String> {
        let Some(tracking_number) = self.resolve_tracking_number(query, today).await? else {
            tracing::debug!(customer_id = self.customer_id, "No order to describe");
            return Ok(format_order(&[]));
        };

        let items = self
            .store
            .purchases_by_tracking(self.customer_id, &tracking_number)
            .await?;
        Ok(format_order(&items))
    }

    /// Invoice number in the query, else the latest order on a mentioned
    /// date, else the customer's latest order.
    pub async fn resolve_tracking_number(&self, query: &str, today: NaiveDate) -> Result<Option<String>> {
        if let Some(invoice) = extract_invoice_number(query) {
            tracing::debug!(invoice = %invoice, "Extracted invoice number from query");
            return Ok(Some(invoice));
        }

        if let Some(date) = extract_date(query, today) {
            let start = date.and_time(chrono::NaiveTime::MIN);
            if let Some(end) = date.succ_opt().map(|d| d.and_time(chrono::NaiveTime::MIN)) {
                if let Some(record) = self
                    .store
                    .latest_purchase_between(self.customer_id, start, end)
                    .await?
                {
                    tracing::debug!(
                        date = %date,
                        invoice = %record.tracking_number,
                        "Resolved invoice from date"
                    );
                    return Ok(Some(record.tracking_number));
                }
            }
        }

        let latest = self.store.latest_purchase(self.customer_id).await?;
        if let Some(record) = &latest {
            tracing::debug!(invoice = %record.tracking_number, "Falling back to latest order");
        }
        Ok(latest.map(|r| r.tracking_number))
    }
}
