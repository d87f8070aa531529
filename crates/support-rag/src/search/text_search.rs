use anyhow::{Context, Result};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{
    self, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value as TantivyValue,
    STORED, STRING,
};
use tantivy::tokenizer::{
    Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, StopWordFilter, TextAnalyzer,
};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

const FAQ_TOKENIZER: &str = "faq_en";

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "if", "in", "is", "it", "me", "my", "of", "on", "or", "the", "to", "what", "when",
    "where", "which", "with", "you", "your",
];

/// Lower-casing English stemmer shared by the keyword index and ROUGE scoring.
pub fn english_stemmer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(Language::English))
        .build()
}

fn faq_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(
            STOP_WORDS.iter().map(|w| w.to_string()).collect::<Vec<_>>(),
        ))
        .filter(Stemmer::new(Language::English))
        .build()
}

/// In-RAM full-text index over FAQ questions and keywords. Document ids are
/// positions in the caller's FAQ list.
pub struct FaqTextIndex {
    index: Index,
    reader: IndexReader,
    writer: parking_lot::Mutex<IndexWriter>,
    id_field: schema::Field,
    text_field: schema::Field,
}

impl FaqTextIndex {
    fn build_schema() -> (Schema, schema::Field, schema::Field) {
        let mut sb = Schema::builder();
        let id_field = sb.add_text_field("id", STRING | STORED);
        let indexing = TextFieldIndexing::default()
            .set_tokenizer(FAQ_TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions);
        let text_field =
            sb.add_text_field("text", TextOptions::default().set_indexing_options(indexing));
        (sb.build(), id_field, text_field)
    }

    pub fn new() -> Result<Self> {
        let (schema, id_field, text_field) = Self::build_schema();
        let index = Index::create_in_ram(schema);
        index.tokenizers().register(FAQ_TOKENIZER, faq_analyzer());

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create Tantivy reader")?;

        let writer: IndexWriter = index
            .writer_with_num_threads(1, 15_000_000)
            .context("Failed to create Tantivy writer")?;

        Ok(Self {
            index,
            reader,
            writer: parking_lot::Mutex::new(writer),
            id_field,
            text_field,
        })
    }

    /// Index every `(question, keywords)` pair and commit.
    pub fn build<'a, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let index = Self::new()?;
        for (id, (question, keywords)) in entries.into_iter().enumerate() {
            index.add(id, question, keywords)?;
        }
        index.commit()?;
        Ok(index)
    }

    pub fn add(&self, id: usize, question: &str, keywords: &[String]) -> Result<()> {
        let text = if keywords.is_empty() {
            question.to_string()
        } else {
            format!("{} {}", question, keywords.join(" "))
        };
        let writer = self.writer.lock();
        writer.add_document(doc!(
            self.id_field => id.to_string(),
            self.text_field => text,
        ))?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.commit().context("Tantivy commit failed")?;
        self.reader.reload()?;
        Ok(())
    }

    /// Any-term match over the query's content words, best first.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<(usize, f32)>> {
        let sanitized: String = query
            .chars()
            .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
            .collect();
        if sanitized.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let parsed_query = query_parser
            .parse_query(&sanitized)
            .context("Failed to parse FAQ keyword query")?;

        let top_docs = searcher.search(&parsed_query, &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc = searcher.doc::<TantivyDocument>(doc_address)?;
            let id = doc
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<usize>().ok());
            if let Some(id) = id {
                results.push((id, score));
            }
        }
        Ok(results)
    }

    pub fn count(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }
}
