pub mod chat;
pub mod confidence;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod llm;
pub mod privacy;
pub mod retrieval;
pub mod routing;
pub mod search;
pub mod storage;
pub mod support_engine;
pub mod types;

// Re-export primary types for convenience
pub use chat::{Conversation, CustomerSession};
pub use config::SupportConfig;
pub use error::{SupportError, SupportResult};
pub use support_engine::{EngineParts, Retrieval, SupportEngine, TurnOutcome};
pub use types::{
    CustomerId, FaqMatch, FaqRecord, ItemAggregate, ProductRecord, PurchaseRecord,
    RouteCentroidDoc, RouteTable,
};

// Re-export pipeline components
pub use confidence::{ConfidenceGate, ConfidenceReport};
pub use embeddings::{CachedEmbedder, Embedder, MiniLmEmbedder};
pub use llm::{ChatMessage, ChatRole, GenerationConfig, LLMProvider, ProviderInfo};
pub use privacy::{EntityRecognizer, PrivacyFilter, Redactable};
pub use routing::{CollectionRoute, PurchaseRoute, SemanticRouter};
pub use storage::{BackingStore, LanceStore, MemoryStore};

// Re-export common types
pub use anyhow::{Error, Result};
