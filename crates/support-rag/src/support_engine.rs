use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chat::CustomerSession;
use crate::confidence::{should_escalate, ConfidenceGate, ConfidenceReport};
use crate::config::SupportConfig;
use crate::context::format_faqs;
use crate::embeddings::{CachedEmbedder, Embedder, MiniLmConfig, MiniLmEmbedder};
use crate::error::{SupportError, SupportResult};
use crate::llm::{
    transcript_prompt, ChatMessage, ExternalProvider, GenerationConfig, LLMProvider,
    OllamaProvider,
};
use crate::privacy::{PrivacyFilter, Redactable};
use crate::retrieval::{FaqRetriever, ProductRetriever, PurchaseRetriever};
use crate::routing::{CollectionRoute, PurchaseRoute, RouteLabel, SemanticRouter};
use crate::storage::{BackingStore, LanceStore};
use crate::types::{CustomerId, RouteTable};

/// Reply used when the small model is untrusted and the large model is
/// unreachable.
pub const FALLBACK_REPLY: &str =
    "I'm having trouble answering that right now. Please try again in a moment.";

/// Collaborators the engine is assembled from.
pub struct EngineParts {
    pub store: Arc<dyn BackingStore>,
    pub embedder: Arc<dyn Embedder>,
    pub small: Arc<dyn LLMProvider>,
    pub large: Arc<dyn LLMProvider>,
    pub privacy: PrivacyFilter,
}

/// Where a query was sent and what came back.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    pub collection: CollectionRoute,
    pub purchase_route: Option<PurchaseRoute>,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub reply: String,
    pub confident: bool,
    pub escalated: bool,
    /// `None` when the answerability pre-check escalated before retrieval.
    pub retrieval: Option<Retrieval>,
    pub confidence: Option<ConfidenceReport>,
}

/// The retrieval-routing-and-confidence pipeline. Shared by every session;
/// all per-customer state lives in [`CustomerSession`].
pub struct SupportEngine {
    config: SupportConfig,
    store: Arc<dyn BackingStore>,
    embedder: Arc<dyn Embedder>,
    collection_router: SemanticRouter<CollectionRoute>,
    purchase_router: SemanticRouter<PurchaseRoute>,
    products: ProductRetriever,
    faqs: FaqRetriever,
    privacy: PrivacyFilter,
    gate: ConfidenceGate,
    small: Arc<dyn LLMProvider>,
    large: Arc<dyn LLMProvider>,
}

impl SupportEngine {
    /// Open the LanceDB store under `data_dir`, load the embedding model and
    /// connect both language models.
    pub async fn new(config: SupportConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
        std::fs::create_dir_all(&config.data_dir).ok();

        let lance_path = config.data_dir.join("lance_data");
        let store = LanceStore::open(
            lance_path.to_str().unwrap_or("./lance_data"),
            config.embedding.dimension,
        )
        .await
        .context("Failed to initialize LanceDB store")?;

        let minilm_config = MiniLmConfig::from_model_dir(
            &config.embedding.model_dir,
            config.embedding.dimension,
            config.embedding.max_length,
        )
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No embedding model available. Place all-MiniLM-L6-v2 in: {}",
                config.embedding.model_dir.display()
            )
        })?;
        let minilm: Arc<dyn Embedder> =
            Arc::new(MiniLmEmbedder::new(minilm_config).context("Failed to load embeddings")?);
        let embedder = Arc::new(CachedEmbedder::new(minilm, config.embedding.cache_size));

        let small = OllamaProvider::new(
            config.models.small_model_url.clone(),
            config.models.small_model.clone(),
            config.timeouts.generation(),
        )?;
        if let Err(e) = small.warmup().await {
            tracing::warn!(error = %e, "Small model warmup failed, continuing");
        }
        let large = ExternalProvider::new(
            config.models.large_model_endpoint.clone(),
            config.models.large_model.clone(),
            config.models.resolved_api_key(),
            config.timeouts.escalation(),
        )?;

        let privacy = PrivacyFilter::from_config(&config.privacy)?;

        let parts = EngineParts {
            store: Arc::new(store),
            embedder,
            small: Arc::new(small),
            large: Arc::new(large),
            privacy,
        };
        Ok(Self::from_parts(config, parts).await?)
    }

    /// Assemble an engine from existing collaborators. Both routers are
    /// loaded from the store; a missing or malformed route table is fatal.
    pub async fn from_parts(config: SupportConfig, parts: EngineParts) -> SupportResult<Self> {
        let dimension = parts.embedder.dimension();
        let collection_router: SemanticRouter<CollectionRoute> =
            load_router(parts.store.as_ref(), RouteTable::Collection, dimension).await?;
        let purchase_router: SemanticRouter<PurchaseRoute> =
            load_router(parts.store.as_ref(), RouteTable::Purchases, dimension).await?;

        let products =
            ProductRetriever::new(parts.store.clone(), config.retrieval.product_candidates);
        let faqs = FaqRetriever::new(
            parts.store.clone(),
            parts.embedder.clone(),
            config.retrieval.faq_strategy,
            config.retrieval.faq_keyword_limit,
            config.retrieval.faq_category_limit,
        );
        let gate = ConfidenceGate::new(
            parts.small.clone(),
            config.confidence.clone(),
            config.timeouts.sample(),
        );

        tracing::info!(
            dimension,
            small = %parts.small.info().model,
            large = %parts.large.info().model,
            recognizer = parts.privacy.recognizer_name(),
            "Support engine ready"
        );

        Ok(Self {
            config,
            store: parts.store,
            embedder: parts.embedder,
            collection_router,
            purchase_router,
            products,
            faqs,
            privacy: parts.privacy,
            gate,
            small: parts.small,
            large: parts.large,
        })
    }

    pub fn config(&self) -> &SupportConfig {
        &self.config
    }

    /// Load a customer's purchase history and build their session.
    pub async fn start_session(&self, customer_id: CustomerId) -> Result<CustomerSession> {
        let started = Instant::now();
        let purchases = bounded(
            self.config.timeouts.store(),
            PurchaseRetriever::load(
                self.store.clone(),
                customer_id,
                self.config.retrieval.clone(),
            ),
        )
        .await
        .with_context(|| format!("Failed to load purchase history for customer {}", customer_id))?;

        tracing::info!(
            customer_id,
            items = purchases.aggregates().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Session started"
        );
        Ok(CustomerSession::new(purchases))
    }

    /// Route the query and return the formatted context block. Retrieval
    /// failures are logged and yield an empty block.
    pub async fn route_and_retrieve(&self, session: &CustomerSession, query: &str) -> String {
        self.retrieve(session, query).await.context
    }

    pub async fn retrieve(&self, session: &CustomerSession, query: &str) -> Retrieval {
        let started = Instant::now();
        let embedding = match self.embedder.embed(query) {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, "Query embedding failed, continuing without context");
                return Retrieval {
                    collection: CollectionRoute::Faq,
                    purchase_route: None,
                    context: String::new(),
                };
            }
        };

        let (collection, _) = self.collection_router.route(&embedding);
        let retrieval = &self.config.retrieval;
        let timeout = self.config.timeouts.store();

        let (purchase_route, result) = match collection {
            CollectionRoute::Faq => {
                let search = async {
                    let hits = self
                        .faqs
                        .search_embedded(query, &embedding, retrieval.faq_top_k)
                        .await?;
                    Ok::<_, anyhow::Error>(format_faqs(&hits))
                };
                (None, bounded(timeout, search).await)
            }
            CollectionRoute::Products => (
                None,
                bounded(
                    timeout,
                    self.products.search(&embedding, retrieval.product_top_k),
                )
                .await,
            ),
            CollectionRoute::Purchases => {
                let (route, _) = self.purchase_router.route(&embedding);
                let search = session.purchases.search(
                    route,
                    query,
                    &embedding,
                    retrieval.purchase_top_k,
                );
                (Some(route), bounded(timeout, search).await)
            }
        };

        let context = result.unwrap_or_else(|e| {
            tracing::warn!(
                route = collection.label(),
                error = %e,
                "Retrieval failed, continuing without context"
            );
            String::new()
        });

        tracing::debug!(
            route = collection.label(),
            purchase_route = ?purchase_route,
            context_len = context.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Retrieved context"
        );

        Retrieval {
            collection,
            purchase_route,
            context,
        }
    }

    pub async fn check_confidence(&self, prompt: &str, answer: &str) -> bool {
        self.gate.check(prompt, answer).await
    }

    pub fn redact<T: Redactable>(&self, input: T) -> T {
        self.privacy.redact(input)
    }

    /// Run one user turn end to end: retrieve, answer with the small model,
    /// gate the answer and escalate to the large model when untrusted.
    pub async fn process_turn(&self, session: &mut CustomerSession, user_input: &str) -> TurnOutcome {
        let started = Instant::now();
        session
            .conversation
            .apply_retention(self.config.conversation.retained_turns);
        session.conversation.push_user(user_input, &self.privacy);

        if self.config.confidence.answerability_precheck
            && should_escalate(
                self.small.as_ref(),
                user_input,
                &self.config.confidence.stop_sequences,
            )
            .await
        {
            tracing::info!(customer_id = session.customer_id, "Question judged unanswerable, escalating");
            let reply = self.escalate(session, None).await;
            return self.finish(session, reply, false, true, None, None, started);
        }

        let retrieval = self.retrieve(session, user_input).await;
        let prompt = build_prompt(&retrieval.context, session.conversation.raw());

        let greedy = GenerationConfig::greedy(
            self.config.confidence.max_tokens,
            self.config.confidence.stop_sequences.clone(),
        );
        let answer = match bounded(
            self.config.timeouts.generation(),
            self.small.generate(&prompt, &greedy),
        )
        .await
        {
            Ok(answer) => Some(answer),
            Err(e) => {
                tracing::warn!(error = %e, "Small model failed");
                None
            }
        };

        let report = match &answer {
            Some(answer) => Some(self.gate.evaluate(&prompt, answer).await),
            None => None,
        };
        let confident = report.as_ref().is_some_and(|r| r.confident);

        let (reply, escalated) = match answer {
            Some(answer) if confident => (answer, false),
            other => (self.escalate(session, other).await, true),
        };
        self.finish(session, reply, confident, escalated, Some(retrieval), report, started)
    }

    /// Send the redacted conversation to the large model. Falls back to the
    /// small model's answer, then to a fixed reply, when the call fails.
    async fn escalate(&self, session: &CustomerSession, small_answer: Option<String>) -> String {
        let messages = session.conversation.redacted();
        let config = GenerationConfig {
            max_tokens: self.config.models.escalation_max_tokens,
            ..GenerationConfig::default()
        };
        match bounded(self.config.timeouts.escalation(), self.large.chat(messages, &config)).await {
            Ok(reply) => {
                tracing::info!(
                    customer_id = session.customer_id,
                    model = %self.large.info().model,
                    "Escalated to large model"
                );
                reply
            }
            Err(e) => {
                tracing::error!(error = %e, "Large model call failed");
                small_answer
                    .filter(|a| !a.trim().is_empty())
                    .unwrap_or_else(|| FALLBACK_REPLY.to_string())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        session: &mut CustomerSession,
        reply: String,
        confident: bool,
        escalated: bool,
        retrieval: Option<Retrieval>,
        confidence: Option<ConfidenceReport>,
        started: Instant,
    ) -> TurnOutcome {
        session.conversation.push_assistant(reply.clone(), &self.privacy);
        tracing::info!(
            customer_id = session.customer_id,
            route = retrieval.as_ref().map(|r| r.collection.label()),
            confident,
            escalated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Turn complete"
        );
        TurnOutcome {
            reply,
            confident,
            escalated,
            retrieval,
            confidence,
        }
    }
}

async fn load_router<R: RouteLabel>(
    store: &dyn BackingStore,
    table: RouteTable,
    dimension: usize,
) -> SupportResult<SemanticRouter<R>> {
    let docs = store
        .route_centroids(table)
        .await
        .map_err(|e| SupportError::Store(format!("{}: {}", table.collection_name(), e)))?;
    let router = SemanticRouter::<R>::from_docs(docs)?;
    if router.dimension() != dimension {
        return Err(SupportError::DimensionMismatch {
            route: R::ROUTER_NAME.to_string(),
            expected: dimension,
            actual: router.dimension(),
        });
    }
    Ok(router)
}

/// Prompt for the small model: the retrieved context followed by the
/// conversation transcript, ending with an open assistant turn.
pub fn build_prompt(context: &str, conversation: &[ChatMessage]) -> String {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(ChatMessage::system(format!("Context:\n{}", context)));
    messages.extend_from_slice(conversation);
    transcript_prompt(&messages)
}

/// Await `fut`, turning an elapsed deadline into an error.
async fn bounded<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| anyhow::anyhow!("timed out after {:?}", limit))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatRole, ProviderInfo};
    use crate::retrieval::prepare_faq;
    use crate::storage::MemoryStore;
    use crate::types::{FaqRecord, PurchaseRecord, RouteCentroidDoc, ScoredProduct, ScoredPurchase};
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime};
    use parking_lot::Mutex;

    /// Keyword axes: order, item, faq, product, bias.
    struct KeywordEmbedder;

    impl Embedder for KeywordEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let lower = text.to_lowercase();
            let has = |words: &[&str]| {
                if words.iter().any(|w| lower.contains(w)) {
                    1.0
                } else {
                    0.0
                }
            };
            Ok(vec![
                has(&["order", "invoice"]),
                has(&["lantern"]),
                has(&["policy", "return"]),
                has(&["recommend", "sell"]),
                0.1,
            ])
        }

        fn dimension(&self) -> usize {
            5
        }
    }

    /// Greedy calls answer with `answer`; sampled calls with `sample`.
    struct FakeSmall {
        answer: Option<&'static str>,
        sample: &'static str,
        prompts: Mutex<Vec<String>>,
    }

    impl FakeSmall {
        fn new(answer: Option<&'static str>, sample: &'static str) -> Arc<Self> {
            Arc::new(Self {
                answer,
                sample,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for FakeSmall {
        async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String> {
            self.prompts.lock().push(prompt.to_string());
            if config.is_greedy() {
                self.answer
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("small model offline"))
            } else {
                Ok(self.sample.to_string())
            }
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "fake".to_string(),
                model: "small".to_string(),
                is_local: true,
            }
        }
    }

    struct FakeLarge {
        reply: Option<&'static str>,
        received: Mutex<Vec<Vec<ChatMessage>>>,
        max_tokens: Mutex<Vec<usize>>,
    }

    impl FakeLarge {
        fn new(reply: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                received: Mutex::new(Vec::new()),
                max_tokens: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for FakeLarge {
        async fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<String> {
            Err(anyhow::anyhow!("chat only"))
        }

        async fn chat(&self, messages: &[ChatMessage], config: &GenerationConfig) -> Result<String> {
            self.received.lock().push(messages.to_vec());
            self.max_tokens.lock().push(config.max_tokens);
            self.reply
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("large model offline"))
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "fake".to_string(),
                model: "large".to_string(),
                is_local: false,
            }
        }
    }

    #[derive(Clone, Copy)]
    enum Fault {
        Fail,
        Stall,
    }

    /// Serves sessions and route tables from a healthy store; every
    /// retrieval query fails or hangs.
    struct FaultyStore {
        inner: MemoryStore,
        fault: Fault,
    }

    impl FaultyStore {
        async fn fault<T>(&self) -> Result<T> {
            if let Fault::Stall = self.fault {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Err(anyhow::anyhow!("store unavailable"))
        }
    }

    #[async_trait]
    impl BackingStore for FaultyStore {
        async fn purchases_for_customer(&self, customer_id: CustomerId) -> Result<Vec<PurchaseRecord>> {
            self.inner.purchases_for_customer(customer_id).await
        }

        async fn search_purchases(
            &self,
            _customer_id: CustomerId,
            _query_embedding: &[f32],
            _top_k: usize,
            _num_candidates: usize,
        ) -> Result<Vec<ScoredPurchase>> {
            self.fault().await
        }

        async fn purchases_by_tracking(
            &self,
            _customer_id: CustomerId,
            _tracking_number: &str,
        ) -> Result<Vec<PurchaseRecord>> {
            self.fault().await
        }

        async fn latest_purchase(&self, _customer_id: CustomerId) -> Result<Option<PurchaseRecord>> {
            self.fault().await
        }

        async fn latest_purchase_between(
            &self,
            _customer_id: CustomerId,
            _start: NaiveDateTime,
            _end: NaiveDateTime,
        ) -> Result<Option<PurchaseRecord>> {
            self.fault().await
        }

        async fn search_products(
            &self,
            _query_embedding: &[f32],
            _top_k: usize,
            _num_candidates: usize,
        ) -> Result<Vec<ScoredProduct>> {
            self.fault().await
        }

        async fn text_search_faqs(&self, _query: &str, _limit: usize) -> Result<Vec<FaqRecord>> {
            self.fault().await
        }

        async fn list_faqs(
            &self,
            _categories: Option<&[String]>,
            _limit: Option<usize>,
        ) -> Result<Vec<FaqRecord>> {
            self.fault().await
        }

        async fn route_centroids(&self, table: RouteTable) -> Result<Vec<RouteCentroidDoc>> {
            self.inner.route_centroids(table).await
        }
    }

    async fn faulty_engine(fault: Fault, small: Arc<dyn LLMProvider>) -> SupportEngine {
        let mut config = SupportConfig::default();
        config.timeouts.store_secs = 1;
        let parts = EngineParts {
            store: Arc::new(FaultyStore {
                inner: store(),
                fault,
            }),
            embedder: Arc::new(KeywordEmbedder),
            small,
            large: FakeLarge::new(None),
            privacy: PrivacyFilter::patterns_only(),
        };
        SupportEngine::from_parts(config, parts).await.unwrap()
    }

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2010, 12, day)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
    }

    fn line(invoice: &str, code: &str, title: &str, price: f64, day: u32) -> PurchaseRecord {
        PurchaseRecord {
            tracking_number: invoice.to_string(),
            stock_code: code.to_string(),
            title: title.to_string(),
            quantity: 1,
            unit_price: price,
            order_date: at(day),
            delivery_date: Some(at(day + 3)),
            address: "12 Main St".to_string(),
            customer_id: 42,
            embedding: KeywordEmbedder.embed(title).unwrap(),
        }
    }

    fn centroid(route: &str, embedding: Vec<f32>) -> RouteCentroidDoc {
        RouteCentroidDoc {
            route: route.to_string(),
            examples: Vec::new(),
            embedding,
        }
    }

    fn store() -> MemoryStore {
        let purchases = vec![
            line("536500", "C3", "CANDLE HOLDER", 3.0, 1),
            line("536592", "A1", "HEART TEACUP", 5.0, 5),
            line("536592", "B2", "WHITE LANTERN", 10.0, 5),
            line("536592", "A1", "HEART TEACUP", 5.0, 5),
        ];
        let faqs = vec![prepare_faq(
            "What is your return policy?",
            "Returns are accepted within 30 days.",
            &KeywordEmbedder,
        )
        .unwrap()];

        MemoryStore::new(purchases, Vec::new(), faqs)
            .unwrap()
            .with_centroids(
                RouteTable::Collection,
                vec![
                    centroid("faq", vec![0.0, 0.0, 1.0, 0.0, 0.1]),
                    centroid("products", vec![0.0, 0.0, 0.0, 1.0, 0.1]),
                    centroid("purchases", vec![1.0, 1.0, 0.0, 0.0, 0.1]),
                ],
            )
            .with_centroids(
                RouteTable::Purchases,
                vec![
                    centroid("item_based", vec![0.0, 1.0, 0.0, 0.0, 0.1]),
                    centroid("order_based", vec![1.0, 0.0, 0.0, 0.0, 0.1]),
                ],
            )
    }

    async fn engine_with(
        config: SupportConfig,
        store: MemoryStore,
        small: Arc<dyn LLMProvider>,
        large: Arc<dyn LLMProvider>,
    ) -> SupportResult<SupportEngine> {
        let parts = EngineParts {
            store: Arc::new(store),
            embedder: Arc::new(KeywordEmbedder),
            small,
            large,
            privacy: PrivacyFilter::patterns_only(),
        };
        SupportEngine::from_parts(config, parts).await
    }

    async fn engine(
        store: MemoryStore,
        small: Arc<dyn LLMProvider>,
        large: Arc<dyn LLMProvider>,
    ) -> SupportResult<SupportEngine> {
        engine_with(SupportConfig::default(), store, small, large).await
    }

    const ANSWER: &str = "Your last order 536592 cost $20.00.";

    #[tokio::test]
    async fn test_last_order_scenario() {
        let small = FakeSmall::new(Some(ANSWER), ANSWER);
        let large = FakeLarge::new(Some("unused"));
        let e = engine(store(), small.clone(), large.clone()).await.unwrap();
        let mut session = e.start_session(42).await.unwrap();

        let retrieval = e.retrieve(&session, "What was my last order?").await;
        assert_eq!(retrieval.collection, CollectionRoute::Purchases);
        assert_eq!(retrieval.purchase_route, Some(PurchaseRoute::OrderBased));
        assert!(retrieval.context.contains("TrackingNumber: 536592"));
        assert!(retrieval.context.contains("Total Cost: $20.00"));
        assert!(retrieval.context.contains(" - [A1, HEART TEACUP, 2]"));
        assert!(retrieval.context.contains(" - [B2, WHITE LANTERN, 1]"));

        let outcome = e.process_turn(&mut session, "What was my last order?").await;
        assert_eq!(outcome.reply, ANSWER);
        assert!(outcome.confident);
        assert!(!outcome.escalated);
        assert!(large.received.lock().is_empty());

        let prompts = small.prompts.lock();
        assert!(prompts[0].starts_with("Context:\nOrder Details:\n"));
        assert!(prompts[0].ends_with("You: What was my last order?\nAI: "));
        // One greedy answer plus the default two resamples.
        assert_eq!(prompts.len(), 3);
    }

    #[tokio::test]
    async fn test_item_and_faq_routes() {
        let mut config = SupportConfig::default();
        config.retrieval.purchase_top_k = 1;
        let e = engine_with(
            config,
            store(),
            FakeSmall::new(Some(ANSWER), ANSWER),
            FakeLarge::new(None),
        )
        .await
        .unwrap();
        let session = e.start_session(42).await.unwrap();

        let retrieval = e.retrieve(&session, "How much did I spend on the lantern?").await;
        assert_eq!(retrieval.purchase_route, Some(PurchaseRoute::ItemBased));
        assert!(retrieval.context.starts_with("Title: WHITE LANTERN\nStockCode: B2\n"));
        assert!(retrieval.context.contains("Total Spent: $10.00"));
        assert!(!retrieval.context.contains("HEART TEACUP"));

        let faq = e.route_and_retrieve(&session, "What is your return policy?").await;
        assert!(faq.starts_with("Relevant FAQs:\n\n1. Q: What is your return policy?"));
    }

    #[tokio::test]
    async fn test_customer_without_history_gets_header_only() {
        let e = engine(
            store(),
            FakeSmall::new(Some(ANSWER), ANSWER),
            FakeLarge::new(None),
        )
        .await
        .unwrap();
        let session = e.start_session(7).await.unwrap();
        assert!(session.purchases.aggregates().is_empty());
        assert_eq!(
            e.route_and_retrieve(&session, "Where is my order?").await,
            "Order Details:"
        );
    }

    #[tokio::test]
    async fn test_untrusted_answer_escalates_redacted_conversation() {
        let small = FakeSmall::new(Some("I'm not sure, sorry."), "I'm not sure, sorry.");
        let large = FakeLarge::new(Some("Your order shipped on December 8."));
        let e = engine(store(), small.clone(), large.clone()).await.unwrap();
        let mut session = e.start_session(42).await.unwrap();

        let outcome = e
            .process_turn(&mut session, "Where is my order? Email me at a@b.com")
            .await;
        assert!(outcome.escalated);
        assert!(!outcome.confident);
        assert_eq!(outcome.reply, "Your order shipped on December 8.");
        // Gate A rejected, so only the greedy call reached the small model.
        assert_eq!(small.prompts.lock().len(), 1);

        let received = large.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].len(), 1);
        assert_eq!(received[0][0].role, ChatRole::User);
        assert_eq!(
            received[0][0].content,
            "Where is my order? Email me at [REDACTED EMAIL]"
        );

        assert_eq!(session.conversation.len(), 2);
        assert_eq!(
            session.conversation.raw()[0].content,
            "Where is my order? Email me at a@b.com"
        );
    }

    #[tokio::test]
    async fn test_failing_store_yields_empty_context() {
        let small = FakeSmall::new(Some(ANSWER), ANSWER);
        let e = faulty_engine(Fault::Fail, small.clone()).await;
        let mut session = e.start_session(42).await.unwrap();
        assert_eq!(session.purchases.aggregates().len(), 3);

        let queries = [
            ("What was my last order?", CollectionRoute::Purchases),
            ("How much did I spend on the lantern?", CollectionRoute::Purchases),
            ("What is your return policy?", CollectionRoute::Faq),
            ("What do you recommend?", CollectionRoute::Products),
        ];
        for (query, route) in queries {
            let retrieval = e.retrieve(&session, query).await;
            assert_eq!(retrieval.collection, route, "query: {}", query);
            assert_eq!(retrieval.context, "", "query: {}", query);
        }

        let outcome = e.process_turn(&mut session, "What was my last order?").await;
        assert_eq!(outcome.reply, ANSWER);
        assert!(!outcome.escalated);
        assert_eq!(outcome.retrieval.map(|r| r.context), Some(String::new()));
        assert!(small.prompts.lock()[0].starts_with("Context:\n\nYou: What was my last order?"));
    }

    #[tokio::test]
    async fn test_stalled_store_times_out_to_empty_context() {
        let e = faulty_engine(Fault::Stall, FakeSmall::new(Some(ANSWER), ANSWER)).await;
        let mut session = e.start_session(42).await.unwrap();

        assert_eq!(e.route_and_retrieve(&session, "What was my last order?").await, "");
        let outcome = e.process_turn(&mut session, "What is your return policy?").await;
        assert_eq!(outcome.reply, ANSWER);
        assert_eq!(session.conversation.len(), 2);
    }

    #[tokio::test]
    async fn test_escalation_uses_configured_reply_length() {
        let mut config = SupportConfig::default();
        config.models.escalation_max_tokens = 256;
        let large = FakeLarge::new(Some("Let me check that for you."));
        let e = engine_with(
            config,
            store(),
            FakeSmall::new(Some("Sorry, I cannot help."), ANSWER),
            large.clone(),
        )
        .await
        .unwrap();
        let mut session = e.start_session(42).await.unwrap();
        let outcome = e.process_turn(&mut session, "Where is my order?").await;
        assert!(outcome.escalated);
        assert_eq!(*large.max_tokens.lock(), vec![256]);
    }

    #[tokio::test]
    async fn test_model_failures_fall_back() {
        let e = engine(store(), FakeSmall::new(None, ANSWER), FakeLarge::new(None))
            .await
            .unwrap();
        let mut session = e.start_session(42).await.unwrap();
        let outcome = e.process_turn(&mut session, "What was my last order?").await;
        assert!(outcome.escalated);
        assert!(outcome.confidence.is_none());
        assert_eq!(outcome.reply, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_default_retention_starts_each_turn_empty() {
        let e = engine(
            store(),
            FakeSmall::new(Some(ANSWER), ANSWER),
            FakeLarge::new(None),
        )
        .await
        .unwrap();
        let mut session = e.start_session(42).await.unwrap();
        e.process_turn(&mut session, "What was my last order?").await;
        e.process_turn(&mut session, "And before that?").await;
        assert_eq!(session.conversation.len(), 2);
        assert_eq!(session.conversation.raw()[0].content, "And before that?");
    }

    #[tokio::test]
    async fn test_check_confidence_and_redact() {
        let e = engine(
            store(),
            FakeSmall::new(Some(ANSWER), ANSWER),
            FakeLarge::new(None),
        )
        .await
        .unwrap();
        assert!(e.check_confidence("prompt", ANSWER).await);
        assert!(!e.check_confidence("prompt", "As an AI I cannot tell.").await);
        assert_eq!(
            e.redact("Contact me at a@b.com or 416-555-0100".to_string()),
            "Contact me at [REDACTED EMAIL] or [REDACTED PHONE]"
        );
    }

    #[tokio::test]
    async fn test_missing_routes_are_fatal() {
        let bare = MemoryStore::new(Vec::new(), Vec::new(), Vec::new()).unwrap();
        let result = engine(bare, FakeSmall::new(None, ""), FakeLarge::new(None)).await;
        assert!(matches!(result, Err(SupportError::EmptyRoutes("collection"))));

        let wrong_dimension = MemoryStore::new(Vec::new(), Vec::new(), Vec::new())
            .unwrap()
            .with_centroids(RouteTable::Collection, vec![centroid("faq", vec![1.0, 0.0])]);
        let result = engine(wrong_dimension, FakeSmall::new(None, ""), FakeLarge::new(None)).await;
        assert!(matches!(result, Err(SupportError::DimensionMismatch { .. })));
    }
}
