pub mod text_search;

pub use text_search::{english_stemmer, FaqTextIndex};
