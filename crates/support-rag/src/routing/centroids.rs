//! Offline centroid construction and persistence.
//!
//! Centroids are the element-wise mean of the embeddings of a route's example
//! queries. They are built once, persisted (JSON file or the store's routing
//! tables) and loaded read-only at startup.

use std::path::Path;

use crate::embeddings::{mean_vector, Embedder};
use crate::error::{SupportError, SupportResult};
use crate::types::RouteCentroidDoc;

use super::{CollectionRoute, PurchaseRoute, RouteLabel};

const FAQ_EXAMPLES: &[&str] = &[
    "How can I create an account?",
    "What payment methods do you accept?",
    "How can I track my order?",
    "What is your return policy?",
    "Can I cancel my order?",
    "How long does shipping take?",
    "Do you offer international shipping?",
    "What should I do if my package is lost or damaged?",
    "Can I change my shipping address after placing an order?",
    "How can I contact customer support?",
    "Can I order by phone?",
    "Do you have a loyalty program?",
    "Can I change or cancel an item in my order?",
    "How can I leave a product review?",
    "What should I do if I receive the wrong item?",
    "Can I order a product that is out of stock?",
    "Can I return a product if I changed my mind?",
    "Can I return a product without a receipt?",
    "Can I order a product for delivery to a different country?",
    "Can I return a product if it was damaged due to mishandling during shipping?",
];

const PURCHASES_EXAMPLES: &[&str] = &[
    "What did I order last month?",
    "Show me my purchase history",
    "How many CREAM CUPID HEARTS COAT HANGER did I buy?",
    "What was my last order?",
    "When did I buy the WHITE METAL LANTERN?",
    "What orders did I place in December 2010?",
    "What's my total spending this year?",
    "Did I order from you before?",
    "How much did I spend on my last order?",
    "Can I see my order from last week?",
    "What did I purchase on December 1st?",
    "Have I ever bought any heart-themed products?",
    "What quantity of items did I buy in my last order?",
    "When was my first purchase with you?",
    "When did I last order a mug?",
    "What is the tracking number of my latest order?",
    "What is the order number of my red mugs?",
    "What country was my glasses shipped to?",
    "When was my latest order?",
    "Has my order 536367 arrived?",
    "Has my latest order arrived yet?",
    "Has my latest order been delivered yet?",
    "How many wooden frames have I bought before?",
    "How much have I spent on christmas decorations?",
    "How many measuring tapes have I bought before?",
    "What types of measuring tapes have I bought before?",
    "How much have I spent on measuring tapes in total?",
];

const PRODUCTS_EXAMPLES: &[&str] = &[
    "Do you have INFLATABLE POLITICAL GLOBE in stock?",
    "How much does the GROOVY CACTUS INFLATABLE cost?",
    "What's the price of DOGGY RUBBER?",
    "Is the HEARTS WRAPPING TAPE available?",
    "How many SPOTS ON RED BOOKCOVER TAPE do you have in stock?",
    "Show me products with 'HEART' in the name",
    "What inflatable products do you sell?",
    "Do you have any wrapping tape in stock?",
    "What's the cheapest product you have?",
    "Are there any cactus-themed items available?",
    "How much stock do you have of the DOGGY RUBBER?",
    "What products are currently out of stock?",
    "Do you sell any political or globe items?",
    "What is the stock code of the antique frames?",
    "What's the difference between a gold and black tape measure?",
];

const ORDER_BASED_EXAMPLES: &[&str] = &[
    "Tell me about my latest order",
    "What was my most recent purchase?",
    "When did I put in the invoice for my latest purchase?",
    "What is the invoice number for my most recent purchase?",
    "What items do I have in my latest order?",
    "How much did I spend on my latest order?",
    "How many items did I buy in my latest order?",
    "Where was my most recent order shipped to?",
    "Show me my last invoice",
    "What did I just buy?",
    "Details about my newest order",
    "My most recent transaction",
    "Tell me about my invoice 563320",
    "What did I order on March 3rd?",
];

const ITEM_BASED_EXAMPLES: &[&str] = &[
    "When was the last time I ordered socks?",
    "How much have I spent on halloween decorations in total?",
    "How many candles have I bought?",
    "have I bought a pan before?",
    "What was the last time I ordered a pencil sharpener?",
    "Show me all my candle purchases",
    "Find purchases containing 'heart'",
    "How many times have I ordered the DOGGY RUBBER?",
    "History of all my lantern purchases",
    "When was my latest order of pet food?",
    "What did I buy in December 2010?",
    "How many wooden frames have I bought before?",
    "How much have I spent on measuring tapes in total?",
    "Which mugs have I ordered from you?",
];

/// Built-in example queries for the collection router.
pub fn collection_examples() -> Vec<(CollectionRoute, Vec<String>)> {
    vec![
        (CollectionRoute::Faq, to_owned(FAQ_EXAMPLES)),
        (CollectionRoute::Products, to_owned(PRODUCTS_EXAMPLES)),
        (CollectionRoute::Purchases, to_owned(PURCHASES_EXAMPLES)),
    ]
}

/// Built-in example queries for the purchase-strategy router.
pub fn purchase_examples() -> Vec<(PurchaseRoute, Vec<String>)> {
    vec![
        (PurchaseRoute::ItemBased, to_owned(ITEM_BASED_EXAMPLES)),
        (PurchaseRoute::OrderBased, to_owned(ORDER_BASED_EXAMPLES)),
    ]
}

fn to_owned(examples: &[&str]) -> Vec<String> {
    examples.iter().map(|s| s.to_string()).collect()
}

/// Embed every example and average per route.
pub fn build_centroids<R: RouteLabel>(
    embedder: &dyn Embedder,
    examples: &[(R, Vec<String>)],
) -> SupportResult<Vec<RouteCentroidDoc>> {
    let mut docs = Vec::with_capacity(examples.len());
    for (route, texts) in examples {
        if texts.is_empty() {
            return Err(SupportError::InvalidConfig(format!(
                "route '{}' has no example queries",
                route.label()
            )));
        }
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let embeddings = embedder
            .embed_batch(&refs)
            .map_err(|e| SupportError::Embedding(e.to_string()))?;
        let embedding = mean_vector(&embeddings).ok_or_else(|| SupportError::DimensionMismatch {
            route: route.label().to_string(),
            expected: embedder.dimension(),
            actual: embeddings.first().map(Vec::len).unwrap_or(0),
        })?;

        tracing::info!(
            router = R::ROUTER_NAME,
            route = route.label(),
            examples = texts.len(),
            "Built route centroid"
        );
        docs.push(RouteCentroidDoc {
            route: route.label().to_string(),
            examples: texts.clone(),
            embedding,
        });
    }
    Ok(docs)
}

pub fn save_centroids_file(path: &Path, docs: &[RouteCentroidDoc]) -> SupportResult<()> {
    let json = serde_json::to_string_pretty(docs)?;
    std::fs::write(path, json)
        .map_err(|e| SupportError::Store(format!("Failed to write {}: {}", path.display(), e)))
}

pub fn load_centroids_file(path: &Path) -> SupportResult<Vec<RouteCentroidDoc>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SupportError::Store(format!("Failed to read {}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&content)?)
}
