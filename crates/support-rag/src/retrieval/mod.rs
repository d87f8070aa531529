//! Domain retrievers: purchase history, product catalogue and FAQs.

pub mod faq;
pub mod invoice;
pub mod products;
pub mod purchases;

pub use faq::{
    categorize_question, detect_categories, extract_keywords, prepare_faq, FaqRetriever,
    FaqStrategy,
};
pub use invoice::{extract_date, extract_invoice_number};
pub use products::ProductRetriever;
pub use purchases::{build_aggregates, PurchaseRetriever};
