use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Float64Array, Int64Array, RecordBatch,
    RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use lancedb::query::{ExecutableQuery, QueryBase};
use parking_lot::RwLock;
use std::sync::Arc;

use super::{has_any_category, most_recent, BackingStore};
use crate::search::FaqTextIndex;
use crate::types::{
    CustomerId, FaqRecord, ProductRecord, PurchaseRecord, RouteCentroidDoc, RouteTable,
    ScoredProduct, ScoredPurchase,
};

const PURCHASES: &str = "purchases";
const PRODUCTS: &str = "products";
const FAQS: &str = "faqs";

/// LanceDB-backed store. One table per collection; FAQ keyword search runs
/// on an in-RAM tantivy index rebuilt from the `faqs` table.
pub struct LanceStore {
    db: lancedb::Connection,
    dimension: usize,
    faqs: RwLock<FaqSnapshot>,
}

struct FaqSnapshot {
    records: Vec<FaqRecord>,
    index: FaqTextIndex,
}

fn vector_field(dimension: usize) -> Field {
    Field::new(
        "vector",
        DataType::FixedSizeList(
            Arc::new(Field::new("item", DataType::Float32, true)),
            dimension as i32,
        ),
        true,
    )
}

fn vector_array(vectors: &[&[f32]], dimension: usize) -> Result<FixedSizeListArray> {
    let mut flat = Vec::with_capacity(vectors.len() * dimension);
    for v in vectors {
        if v.len() != dimension {
            anyhow::bail!(
                "Embedding has dimension {}, table expects {}",
                v.len(),
                dimension
            );
        }
        flat.extend_from_slice(v);
    }
    let values = Float32Array::from(flat);
    Ok(FixedSizeListArray::new(
        Arc::new(Field::new("item", DataType::Float32, true)),
        dimension as i32,
        Arc::new(values) as Arc<dyn Array>,
        None,
    ))
}

fn to_timestamp(dt: &NaiveDateTime) -> i64 {
    dt.and_utc().timestamp()
}

fn from_timestamp(secs: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(secs, 0).map(|d| d.naive_utc())
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn str_col<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
}

fn i64_col<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
}

fn f64_col<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a Float64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
}

fn vector_at(batch: &RecordBatch, row: usize) -> Vec<f32> {
    batch
        .column_by_name("vector")
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .and_then(|list| {
            let values = list.value(row);
            values
                .as_any()
                .downcast_ref::<Float32Array>()
                .map(|f| f.values().to_vec())
        })
        .unwrap_or_default()
}

fn distance_score(batch: &RecordBatch, row: usize) -> f32 {
    batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .map(|d| (1.0 - d.value(row)).max(0.0))
        .unwrap_or(0.0)
}

fn json_list(value: &str) -> Vec<String> {
    serde_json::from_str(value).unwrap_or_default()
}

fn extract_purchases(batches: &[RecordBatch]) -> Vec<(PurchaseRecord, f32)> {
    let mut out = Vec::new();
    for batch in batches {
        let (
            Some(tracking),
            Some(codes),
            Some(titles),
            Some(quantities),
            Some(prices),
            Some(order_ts),
            Some(delivery_ts),
            Some(addresses),
            Some(customers),
        ) = (
            str_col(batch, "tracking_number"),
            str_col(batch, "stock_code"),
            str_col(batch, "title"),
            i64_col(batch, "quantity"),
            f64_col(batch, "unit_price"),
            i64_col(batch, "order_ts"),
            i64_col(batch, "delivery_ts"),
            str_col(batch, "address"),
            i64_col(batch, "customer_id"),
        )
        else {
            continue;
        };

        for i in 0..batch.num_rows() {
            let Some(order_date) = from_timestamp(order_ts.value(i)) else {
                tracing::warn!(row = i, "Skipping purchase with invalid order timestamp");
                continue;
            };
            let delivery_date = if delivery_ts.is_null(i) {
                None
            } else {
                from_timestamp(delivery_ts.value(i))
            };
            out.push((
                PurchaseRecord {
                    tracking_number: tracking.value(i).to_string(),
                    stock_code: codes.value(i).to_string(),
                    title: titles.value(i).to_string(),
                    quantity: quantities.value(i),
                    unit_price: prices.value(i),
                    order_date,
                    delivery_date,
                    address: addresses.value(i).to_string(),
                    customer_id: customers.value(i),
                    embedding: vector_at(batch, i),
                },
                distance_score(batch, i),
            ));
        }
    }
    out
}

fn extract_products(batches: &[RecordBatch]) -> Vec<(ProductRecord, f32)> {
    let mut out = Vec::new();
    for batch in batches {
        let (Some(codes), Some(titles), Some(prices), Some(stock)) = (
            str_col(batch, "stock_code"),
            str_col(batch, "title"),
            f64_col(batch, "unit_price"),
            i64_col(batch, "stock_quantity"),
        ) else {
            continue;
        };
        for i in 0..batch.num_rows() {
            out.push((
                ProductRecord {
                    stock_code: codes.value(i).to_string(),
                    title: titles.value(i).to_string(),
                    unit_price: (!prices.is_null(i)).then(|| prices.value(i)),
                    stock_quantity: (!stock.is_null(i)).then(|| stock.value(i)),
                    embedding: vector_at(batch, i),
                },
                distance_score(batch, i),
            ));
        }
    }
    out
}

fn extract_faqs(batches: &[RecordBatch]) -> Vec<FaqRecord> {
    let mut out = Vec::new();
    for batch in batches {
        let (Some(questions), Some(answers), Some(categories), Some(keywords)) = (
            str_col(batch, "question"),
            str_col(batch, "answer"),
            str_col(batch, "categories_json"),
            str_col(batch, "keywords_json"),
        ) else {
            continue;
        };
        for i in 0..batch.num_rows() {
            out.push(FaqRecord {
                question: questions.value(i).to_string(),
                answer: answers.value(i).to_string(),
                embedding: vector_at(batch, i),
                categories: json_list(categories.value(i)),
                keywords: json_list(keywords.value(i)),
            });
        }
    }
    out
}

fn extract_centroids(batches: &[RecordBatch]) -> Vec<RouteCentroidDoc> {
    let mut out = Vec::new();
    for batch in batches {
        let (Some(routes), Some(examples)) =
            (str_col(batch, "route"), str_col(batch, "examples_json"))
        else {
            continue;
        };
        for i in 0..batch.num_rows() {
            out.push(RouteCentroidDoc {
                route: routes.value(i).to_string(),
                examples: json_list(examples.value(i)),
                embedding: vector_at(batch, i),
            });
        }
    }
    out
}

impl LanceStore {
    pub async fn open(path: &str, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(path).ok();
        let db = lancedb::connect(path)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        let store = Self {
            db,
            dimension,
            faqs: RwLock::new(FaqSnapshot {
                records: Vec::new(),
                index: FaqTextIndex::new()?,
            }),
        };
        store.ensure_tables().await?;
        store.reload_faqs().await?;

        tracing::info!(path = %path, dimension, "Opened LanceDB support store");
        Ok(store)
    }

    fn purchases_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("tracking_number", DataType::Utf8, false),
            Field::new("stock_code", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("quantity", DataType::Int64, false),
            Field::new("unit_price", DataType::Float64, false),
            Field::new("order_ts", DataType::Int64, false),
            Field::new("delivery_ts", DataType::Int64, true),
            Field::new("address", DataType::Utf8, false),
            Field::new("customer_id", DataType::Int64, false),
            vector_field(self.dimension),
        ]))
    }

    fn products_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("stock_code", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("unit_price", DataType::Float64, true),
            Field::new("stock_quantity", DataType::Int64, true),
            vector_field(self.dimension),
        ]))
    }

    fn faqs_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("question", DataType::Utf8, false),
            Field::new("answer", DataType::Utf8, false),
            Field::new("categories_json", DataType::Utf8, false),
            Field::new("keywords_json", DataType::Utf8, false),
            vector_field(self.dimension),
        ]))
    }

    fn routing_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("route", DataType::Utf8, false),
            Field::new("examples_json", DataType::Utf8, false),
            vector_field(self.dimension),
        ]))
    }

    async fn ensure_tables(&self) -> Result<()> {
        let names = self.db.table_names().execute().await?;
        let wanted = [
            (PURCHASES, self.purchases_schema()),
            (PRODUCTS, self.products_schema()),
            (FAQS, self.faqs_schema()),
            (RouteTable::Collection.collection_name(), self.routing_schema()),
            (RouteTable::Purchases.collection_name(), self.routing_schema()),
        ];
        for (name, schema) in wanted {
            if !names.iter().any(|n| n == name) {
                self.db
                    .create_empty_table(name, schema)
                    .execute()
                    .await
                    .with_context(|| format!("Failed to create {} table", name))?;
                tracing::debug!(table = name, "Created LanceDB table");
            }
        }
        Ok(())
    }

    async fn add_batch(&self, table_name: &str, schema: Arc<Schema>, columns: Vec<Arc<dyn Array>>) -> Result<()> {
        let table = self
            .db
            .open_table(table_name)
            .execute()
            .await
            .with_context(|| format!("Failed to open {} table", table_name))?;
        let batch = RecordBatch::try_new(schema.clone(), columns)
            .context("Failed to create RecordBatch")?;
        let rows = batch.num_rows();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(reader))
            .execute()
            .await
            .with_context(|| format!("Failed to insert into {}", table_name))?;
        tracing::debug!(table = table_name, rows, "Inserted rows into LanceDB");
        Ok(())
    }

    async fn query_all(&self, table_name: &str, predicate: Option<String>) -> Result<Vec<RecordBatch>> {
        let table = self.db.open_table(table_name).execute().await?;
        let mut query = table.query();
        if let Some(predicate) = predicate {
            query = query.only_if(predicate);
        }
        let results = query
            .execute()
            .await
            .with_context(|| format!("LanceDB query on {} failed", table_name))?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        Ok(batches)
    }

    async fn nearest(
        &self,
        table_name: &str,
        query_embedding: &[f32],
        limit: usize,
        predicate: Option<String>,
    ) -> Result<Vec<RecordBatch>> {
        let table = self.db.open_table(table_name).execute().await?;
        let mut query_builder = table
            .query()
            .nearest_to(query_embedding)?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(limit);
        if let Some(predicate) = predicate {
            query_builder = query_builder.only_if(predicate);
        }
        let results = query_builder
            .execute()
            .await
            .context("LanceDB vector search failed")?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        Ok(batches)
    }

    pub async fn insert_purchases(&self, records: &[PurchaseRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let vectors: Vec<&[f32]> = records.iter().map(|r| r.embedding.as_slice()).collect();
        let columns: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.tracking_number.as_str()))),
            Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.stock_code.as_str()))),
            Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.title.as_str()))),
            Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.quantity))),
            Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.unit_price))),
            Arc::new(Int64Array::from_iter_values(records.iter().map(|r| to_timestamp(&r.order_date)))),
            Arc::new(Int64Array::from(
                records
                    .iter()
                    .map(|r| r.delivery_date.as_ref().map(to_timestamp))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.address.as_str()))),
            Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.customer_id))),
            Arc::new(vector_array(&vectors, self.dimension)?),
        ];
        self.add_batch(PURCHASES, self.purchases_schema(), columns).await
    }

    pub async fn insert_products(&self, records: &[ProductRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let vectors: Vec<&[f32]> = records.iter().map(|r| r.embedding.as_slice()).collect();
        let columns: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.stock_code.as_str()))),
            Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.title.as_str()))),
            Arc::new(Float64Array::from(records.iter().map(|r| r.unit_price).collect::<Vec<_>>())),
            Arc::new(Int64Array::from(records.iter().map(|r| r.stock_quantity).collect::<Vec<_>>())),
            Arc::new(vector_array(&vectors, self.dimension)?),
        ];
        self.add_batch(PRODUCTS, self.products_schema(), columns).await
    }

    pub async fn insert_faqs(&self, records: &[FaqRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let vectors: Vec<&[f32]> = records.iter().map(|r| r.embedding.as_slice()).collect();
        let categories = records
            .iter()
            .map(|r| serde_json::to_string(&r.categories))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let keywords = records
            .iter()
            .map(|r| serde_json::to_string(&r.keywords))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let columns: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.question.as_str()))),
            Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.answer.as_str()))),
            Arc::new(StringArray::from(categories)),
            Arc::new(StringArray::from(keywords)),
            Arc::new(vector_array(&vectors, self.dimension)?),
        ];
        self.add_batch(FAQS, self.faqs_schema(), columns).await?;
        self.reload_faqs().await
    }

    /// Replace the centroids of one routing table.
    pub async fn replace_centroids(&self, table: RouteTable, docs: &[RouteCentroidDoc]) -> Result<()> {
        let lance_table = self.db.open_table(table.collection_name()).execute().await?;
        lance_table.delete("true").await?;
        if docs.is_empty() {
            return Ok(());
        }
        let vectors: Vec<&[f32]> = docs.iter().map(|d| d.embedding.as_slice()).collect();
        let examples = docs
            .iter()
            .map(|d| serde_json::to_string(&d.examples))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let columns: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from_iter_values(docs.iter().map(|d| d.route.as_str()))),
            Arc::new(StringArray::from(examples)),
            Arc::new(vector_array(&vectors, self.dimension)?),
        ];
        self.add_batch(table.collection_name(), self.routing_schema(), columns)
            .await
    }

    /// Rebuild the FAQ keyword index from the `faqs` table.
    pub async fn reload_faqs(&self) -> Result<()> {
        let batches = self.query_all(FAQS, None).await?;
        let records = extract_faqs(&batches);
        let index = FaqTextIndex::build(
            records
                .iter()
                .map(|f| (f.question.as_str(), f.keywords.as_slice())),
        )?;
        tracing::debug!(faqs = records.len(), "Rebuilt FAQ keyword index");
        *self.faqs.write() = FaqSnapshot { records, index };
        Ok(())
    }

    pub async fn count(&self, table_name: &str) -> Result<usize> {
        let table = self.db.open_table(table_name).execute().await?;
        Ok(table.count_rows(None).await?)
    }
}

#[async_trait]
impl BackingStore for LanceStore {
    async fn purchases_for_customer(&self, customer_id: CustomerId) -> Result<Vec<PurchaseRecord>> {
        let batches = self
            .query_all(PURCHASES, Some(format!("customer_id = {}", customer_id)))
            .await?;
        Ok(extract_purchases(&batches).into_iter().map(|(r, _)| r).collect())
    }

    async fn search_purchases(
        &self,
        customer_id: CustomerId,
        query_embedding: &[f32],
        top_k: usize,
        num_candidates: usize,
    ) -> Result<Vec<ScoredPurchase>> {
        let batches = self
            .nearest(
                PURCHASES,
                query_embedding,
                num_candidates.max(top_k),
                Some(format!("customer_id = {}", customer_id)),
            )
            .await?;
        Ok(extract_purchases(&batches)
            .into_iter()
            .take(top_k)
            .map(|(record, score)| ScoredPurchase { record, score })
            .collect())
    }

    async fn purchases_by_tracking(
        &self,
        customer_id: CustomerId,
        tracking_number: &str,
    ) -> Result<Vec<PurchaseRecord>> {
        let predicate = format!(
            "customer_id = {} AND tracking_number = {}",
            customer_id,
            quote(tracking_number)
        );
        let batches = self.query_all(PURCHASES, Some(predicate)).await?;
        Ok(extract_purchases(&batches).into_iter().map(|(r, _)| r).collect())
    }

    async fn latest_purchase(&self, customer_id: CustomerId) -> Result<Option<PurchaseRecord>> {
        let records = self.purchases_for_customer(customer_id).await?;
        Ok(most_recent(records.iter()))
    }

    async fn latest_purchase_between(
        &self,
        customer_id: CustomerId,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<PurchaseRecord>> {
        let predicate = format!(
            "customer_id = {} AND order_ts >= {} AND order_ts < {}",
            customer_id,
            to_timestamp(&start),
            to_timestamp(&end)
        );
        let batches = self.query_all(PURCHASES, Some(predicate)).await?;
        let records: Vec<PurchaseRecord> =
            extract_purchases(&batches).into_iter().map(|(r, _)| r).collect();
        Ok(most_recent(records.iter()))
    }

    async fn search_products(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        num_candidates: usize,
    ) -> Result<Vec<ScoredProduct>> {
        let batches = self
            .nearest(PRODUCTS, query_embedding, num_candidates.max(top_k), None)
            .await?;
        Ok(extract_products(&batches)
            .into_iter()
            .take(top_k)
            .map(|(record, score)| ScoredProduct { record, score })
            .collect())
    }

    async fn text_search_faqs(&self, query: &str, limit: usize) -> Result<Vec<FaqRecord>> {
        let snapshot = self.faqs.read();
        let hits = snapshot.index.search(query, limit)?;
        Ok(hits
            .into_iter()
            .filter_map(|(id, _)| snapshot.records.get(id).cloned())
            .collect())
    }

    async fn list_faqs(
        &self,
        categories: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<FaqRecord>> {
        let snapshot = self.faqs.read();
        Ok(snapshot
            .records
            .iter()
            .filter(|f| has_any_category(f, categories))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn route_centroids(&self, table: RouteTable) -> Result<Vec<RouteCentroidDoc>> {
        let batches = self.query_all(table.collection_name(), None).await?;
        Ok(extract_centroids(&batches))
    }
}
