use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

use crate::embeddings::{cosine_similarity, Embedder};
use crate::storage::BackingStore;
use crate::types::{FaqMatch, FaqRecord};

/// How FAQ candidates are gathered before similarity re-ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaqStrategy {
    /// Full-text match first, whole collection when nothing matches.
    KeywordFirst,
    /// Filter by categories detected in the query.
    CategoryFirst,
}

/// Category label to trigger phrases. Matching is substring-based on the
/// lower-cased text.
pub const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("account", &["account", "sign up", "registration", "login", "profile"]),
    (
        "payment",
        &["payment", "credit card", "debit card", "paypal", "pay", "invoice", "price"],
    ),
    (
        "shipping",
        &["shipping", "delivery", "ship", "expedited", "international", "track", "package", "country"],
    ),
    ("returns", &["return", "refund", "exchange", "cancel", "change"]),
    (
        "orders",
        &["order", "purchase", "checkout", "cart", "buy", "pre-order", "backorder"],
    ),
    ("products", &["product", "item", "stock", "available", "inventory"]),
    ("support", &["support", "contact", "help", "chat", "phone", "email"]),
    ("policies", &["policy", "terms", "conditions"]),
    (
        "promotions",
        &["discount", "promo", "code", "sale", "loyalty", "gift card"],
    ),
    (
        "services",
        &["service", "services", "gift wrap", "installation", "demonstration", "custom"],
    ),
    ("reviews", &["reviews", "review", "rate"]),
    ("error", &["damaged", "wrong", "improper", "incorrect"]),
    (
        "sales",
        &["sales", "sale", "out of stock", "coming soon", "limited-edition", "discontinued", "clearance"],
    ),
];

pub const DEFAULT_CATEGORY: &str = "general";

const KEYWORD_STOP_WORDS: &[&str] = &[
    "how", "can", "what", "do", "you", "i", "is", "the", "a", "an", "to", "for", "if", "my", "your",
];

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w+\b").expect("word regex is valid"));

/// Categories whose trigger phrases occur in `text`, in table order.
pub fn detect_categories(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(category, _)| category.to_string())
        .collect()
}

/// Categories assigned to an FAQ question at ingestion; never empty.
pub fn categorize_question(question: &str) -> Vec<String> {
    let categories = detect_categories(question);
    if categories.is_empty() {
        vec![DEFAULT_CATEGORY.to_string()]
    } else {
        categories
    }
}

/// Content words of a question: lower-cased, stop words and words of two
/// characters or fewer removed.
pub fn extract_keywords(question: &str) -> Vec<String> {
    let lower = question.to_lowercase();
    WORD_RE
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|w| w.chars().count() > 2 && !KEYWORD_STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Build an ingestion-ready FAQ record.
pub fn prepare_faq(question: &str, answer: &str, embedder: &dyn Embedder) -> Result<FaqRecord> {
    Ok(FaqRecord {
        question: question.to_string(),
        answer: answer.to_string(),
        embedding: embedder.embed(question)?,
        categories: categorize_question(question),
        keywords: extract_keywords(question),
    })
}

pub struct FaqRetriever {
    store: Arc<dyn BackingStore>,
    embedder: Arc<dyn Embedder>,
    strategy: FaqStrategy,
    keyword_limit: usize,
    category_limit: usize,
}

impl FaqRetriever {
    pub fn new(
        store: Arc<dyn BackingStore>,
        embedder: Arc<dyn Embedder>,
        strategy: FaqStrategy,
        keyword_limit: usize,
        category_limit: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            strategy,
            keyword_limit,
            category_limit,
        }
    }

    pub fn strategy(&self) -> FaqStrategy {
        self.strategy
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<FaqMatch>> {
        let embedding = self.embedder.embed(query)?;
        self.search_embedded(query, &embedding, top_k).await
    }

    /// Same as [`search`](Self::search) with a precomputed query embedding.
    pub async fn search_embedded(
        &self,
        query: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<FaqMatch>> {
        let candidates = match self.strategy {
            FaqStrategy::KeywordFirst => self.keyword_candidates(query).await?,
            FaqStrategy::CategoryFirst => self.category_candidates(query).await?,
        };
        let candidate_count = candidates.len();

        let mut scored: Vec<FaqMatch> = candidates
            .into_iter()
            .map(|faq| FaqMatch {
                score: cosine_similarity(query_embedding, &faq.embedding),
                question: faq.question,
                answer: faq.answer,
                categories: faq.categories,
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);

        tracing::debug!(
            strategy = ?self.strategy,
            candidates = candidate_count,
            returned = scored.len(),
            "FAQ search"
        );
        Ok(scored)
    }

    async fn keyword_candidates(&self, query: &str) -> Result<Vec<FaqRecord>> {
        let hits = self
            .store
            .text_search_faqs(query, self.keyword_limit)
            .await?;
        if !hits.is_empty() {
            return Ok(hits);
        }
        self.store.list_faqs(None, None).await
    }

    async fn category_candidates(&self, query: &str) -> Result<Vec<FaqRecord>> {
        let detected = detect_categories(query);
        let filter = (!detected.is_empty()).then_some(detected.as_slice());
        self.store
            .list_faqs(filter, Some(self.category_limit))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    struct TopicEmbedder;

    impl Embedder for TopicEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let lower = text.to_lowercase();
            Ok(vec![
                if lower.contains("return") { 1.0 } else { 0.0 },
                if lower.contains("ship") { 1.0 } else { 0.0 },
                if lower.contains("account") { 1.0 } else { 0.0 },
            ])
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    fn faqs() -> Vec<FaqRecord> {
        [
            ("What is your return policy?", "Within 30 days of delivery."),
            ("How long does shipping take?", "3 to 5 business days."),
            ("How can I create an account?", "Click Sign Up on the home page."),
        ]
        .iter()
        .map(|(q, a)| prepare_faq(q, a, &TopicEmbedder).unwrap())
        .collect()
    }

    fn retriever(strategy: FaqStrategy) -> FaqRetriever {
        let embedder: Arc<dyn Embedder> = Arc::new(TopicEmbedder);
        let store = MemoryStore::new(Vec::new(), Vec::new(), faqs()).unwrap();
        FaqRetriever::new(Arc::new(store), embedder, strategy, 15, 20)
    }

    #[test]
    fn test_keyword_extraction() {
        assert_eq!(
            extract_keywords("How can I create an account?"),
            vec!["create", "account"]
        );
        assert_eq!(
            extract_keywords("What is your return policy?"),
            vec!["return", "policy"]
        );
    }

    #[test]
    fn test_categorize_question() {
        assert_eq!(
            categorize_question("What is your return policy?"),
            vec!["returns", "policies"]
        );
        assert_eq!(categorize_question("Hello there"), vec!["general"]);
        assert!(detect_categories("Hello there").is_empty());
    }

    #[tokio::test]
    async fn test_keyword_first_ranks_by_similarity() {
        let r = retriever(FaqStrategy::KeywordFirst);
        let hits = r.search("Can I return a damaged mug?", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].question, "What is your return policy?");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_keyword_miss_falls_back_to_whole_collection() {
        let r = retriever(FaqStrategy::KeywordFirst);
        let hits = r.search("whereabouts of my shipment", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].question, "How long does shipping take?");
        assert!(hits[0].score >= hits[1].score && hits[1].score >= hits[2].score);
    }

    #[tokio::test]
    async fn test_category_first_filters_by_detected_category() {
        let r = retriever(FaqStrategy::CategoryFirst);
        assert_eq!(r.strategy(), FaqStrategy::CategoryFirst);

        let hits = r.search("I forgot my account login", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].categories, vec!["account"]);

        let undetected = r.search("hello", 5).await.unwrap();
        assert_eq!(undetected.len(), 3);
    }
}
