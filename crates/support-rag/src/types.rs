use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub type CustomerId = i64;

/// One line item of an order, as written by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    /// Invoice number; a leading `C` marks a return.
    pub tracking_number: String,
    pub stock_code: String,
    pub title: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub order_date: NaiveDateTime,
    pub delivery_date: Option<NaiveDateTime>,
    pub address: String,
    pub customer_id: CustomerId,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl PurchaseRecord {
    pub fn line_total(&self) -> f64 {
        self.quantity as f64 * self.unit_price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub stock_code: String,
    pub title: String,
    pub unit_price: Option<f64>,
    pub stock_quantity: Option<i64>,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl ProductRecord {
    /// Displayable fields in a fixed order. The embedding is never included.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("StockCode", self.stock_code.clone()),
            ("Title", self.title.clone()),
        ];
        if let Some(price) = self.unit_price {
            fields.push(("UnitPrice", format!("{:.2}", price)));
        }
        if let Some(qty) = self.stock_quantity {
            fields.push(("StockQuantity", qty.to_string()));
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqRecord {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Per (customer, title) rollup of purchase history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAggregate {
    pub title: String,
    pub stock_code: String,
    pub most_recent_order: NaiveDateTime,
    pub most_recent_tracking_number: String,
    pub total_spent: f64,
    pub total_quantity: i64,
    /// Distinct tracking numbers, most recent first.
    pub tracking_numbers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPurchase {
    pub record: PurchaseRecord,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredProduct {
    pub record: ProductRecord,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqMatch {
    pub question: String,
    pub answer: String,
    pub categories: Vec<String>,
    pub score: f32,
}

/// A persisted routing centroid, as written by the offline builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCentroidDoc {
    pub route: String,
    #[serde(default)]
    pub examples: Vec<String>,
    pub embedding: Vec<f32>,
}

/// Which router a set of centroids belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteTable {
    Collection,
    Purchases,
}

impl RouteTable {
    pub fn collection_name(&self) -> &'static str {
        match self {
            Self::Collection => "collection_routing",
            Self::Purchases => "purchases_routing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_fields_skip_missing_values() {
        let product = ProductRecord {
            stock_code: "22423".to_string(),
            title: "REGENCY CAKESTAND 3 TIER".to_string(),
            unit_price: Some(12.75),
            stock_quantity: None,
            embedding: vec![0.1, 0.2],
        };
        let fields = product.fields();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[2], ("UnitPrice", "12.75".to_string()));
        assert!(fields.iter().all(|(name, _)| *name != "embedding"));
    }

    #[test]
    fn test_purchase_record_deserializes_without_embedding() {
        let json = r#"{
            "tracking_number": "536365",
            "stock_code": "85123A",
            "title": "WHITE HANGING HEART T-LIGHT HOLDER",
            "quantity": 6,
            "unit_price": 2.55,
            "order_date": "2010-12-01T08:26:00",
            "delivery_date": null,
            "address": "12 Main St",
            "customer_id": 17850
        }"#;
        let record: PurchaseRecord = serde_json::from_str(json).unwrap();
        assert!(record.embedding.is_empty());
        assert!((record.line_total() - 15.3).abs() < 1e-9);
    }
}
