//! Semantic Router
//!
//! Nearest-centroid routing over a closed set of labels. Each route is
//! represented by the mean embedding of its example queries; a query goes to
//! the route with the highest cosine similarity. Two independent routers
//! exist: one choosing the data collection, and one choosing the purchase
//! retrieval strategy once `purchases` has been selected.

pub mod centroids;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::embeddings::cosine_similarity;
use crate::error::{SupportError, SupportResult};
use crate::types::RouteCentroidDoc;

pub use centroids::{
    build_centroids, collection_examples, load_centroids_file, purchase_examples,
    save_centroids_file,
};

/// A closed route vocabulary with stable wire labels.
pub trait RouteLabel: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Name used in log lines and configuration errors.
    const ROUTER_NAME: &'static str;

    fn label(&self) -> &'static str;

    fn from_label(label: &str) -> Option<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionRoute {
    Faq,
    Products,
    Purchases,
}

impl RouteLabel for CollectionRoute {
    const ROUTER_NAME: &'static str = "collection";

    fn label(&self) -> &'static str {
        match self {
            Self::Faq => "faq",
            Self::Products => "products",
            Self::Purchases => "purchases",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label {
            "faq" => Some(Self::Faq),
            "products" => Some(Self::Products),
            "purchases" => Some(Self::Purchases),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseRoute {
    ItemBased,
    OrderBased,
}

impl RouteLabel for PurchaseRoute {
    const ROUTER_NAME: &'static str = "purchases";

    fn label(&self) -> &'static str {
        match self {
            Self::ItemBased => "item_based",
            Self::OrderBased => "order_based",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label {
            "item_based" | "specific_item" => Some(Self::ItemBased),
            "order_based" | "latest_purchase" => Some(Self::OrderBased),
            _ => None,
        }
    }
}

/// Outcome of threshold-aware routing, used by offline evaluation tooling.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision<R> {
    Routed { route: R, score: f32 },
    Uncertain { best: R, score: f32 },
}

/// Nearest-centroid router. Centroids are immutable once constructed and
/// iterated in insertion order, so ties resolve to the earliest route.
#[derive(Debug, Clone)]
pub struct SemanticRouter<R: RouteLabel> {
    centroids: Vec<(R, Vec<f32>)>,
    dimension: usize,
}

impl<R: RouteLabel> SemanticRouter<R> {
    /// Build a router from labelled centroids. An empty set or centroids of
    /// differing dimensions are configuration errors.
    pub fn new(centroids: Vec<(R, Vec<f32>)>) -> SupportResult<Self> {
        let dimension = match centroids.first() {
            Some((_, v)) => v.len(),
            None => return Err(SupportError::EmptyRoutes(R::ROUTER_NAME)),
        };
        for (route, v) in &centroids {
            if v.len() != dimension || dimension == 0 {
                return Err(SupportError::DimensionMismatch {
                    route: route.label().to_string(),
                    expected: dimension,
                    actual: v.len(),
                });
            }
        }
        Ok(Self {
            centroids,
            dimension,
        })
    }

    /// Build from persisted centroid documents. Labels outside the route
    /// vocabulary are logged and dropped; duplicates keep the first entry.
    pub fn from_docs(docs: Vec<RouteCentroidDoc>) -> SupportResult<Self> {
        let mut centroids: Vec<(R, Vec<f32>)> = Vec::with_capacity(docs.len());
        for doc in docs {
            match R::from_label(&doc.route) {
                Some(route) if centroids.iter().any(|(r, _)| *r == route) => {
                    tracing::warn!(
                        router = R::ROUTER_NAME,
                        route = %doc.route,
                        "Duplicate route centroid ignored"
                    );
                }
                Some(route) => centroids.push((route, doc.embedding)),
                None => {
                    tracing::warn!(
                        router = R::ROUTER_NAME,
                        route = %doc.route,
                        "Unknown route label in centroid data, route will never be selected"
                    );
                }
            }
        }
        Self::new(centroids)
    }

    /// Route a query embedding to its closest centroid.
    pub fn route(&self, query_embedding: &[f32]) -> (R, f32) {
        let mut best = (self.centroids[0].0, f32::NEG_INFINITY);
        for (route, centroid) in &self.centroids {
            let score = cosine_similarity(query_embedding, centroid);
            // Strict comparison keeps the earliest route on ties.
            if score > best.1 {
                best = (*route, score);
            }
        }

        tracing::debug!(
            router = R::ROUTER_NAME,
            route = best.0.label(),
            score = best.1,
            "Routed query"
        );
        best
    }

    /// Similarity against every route, in insertion order.
    pub fn scores(&self, query_embedding: &[f32]) -> Vec<(R, f32)> {
        self.centroids
            .iter()
            .map(|(route, centroid)| (*route, cosine_similarity(query_embedding, centroid)))
            .collect()
    }

    /// Like [`route`](Self::route) but reports `Uncertain` when the best
    /// score falls below `threshold`. Not used on the online path.
    pub fn route_with_threshold(&self, query_embedding: &[f32], threshold: f32) -> RouteDecision<R> {
        let (route, score) = self.route(query_embedding);
        if score < threshold {
            RouteDecision::Uncertain { best: route, score }
        } else {
            RouteDecision::Routed { route, score }
        }
    }

    pub fn routes(&self) -> impl Iterator<Item = R> + '_ {
        self.centroids.iter().map(|(r, _)| *r)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
