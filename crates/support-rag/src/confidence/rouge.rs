//! ROUGE-1, ROUGE-2 and ROUGE-L F1 over stemmed tokens.

use std::collections::HashMap;
use tantivy::tokenizer::{TextAnalyzer, TokenStream};

use crate::search::english_stemmer;

pub struct RougeScorer {
    analyzer: TextAnalyzer,
}

impl Default for RougeScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl RougeScorer {
    pub fn new() -> Self {
        Self {
            analyzer: english_stemmer(),
        }
    }

    pub fn tokens(&mut self, text: &str) -> Vec<String> {
        let mut stream = self.analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        tokens
    }

    /// Mean of the ROUGE-1, ROUGE-2 and ROUGE-L F1 scores. Symmetric in its
    /// arguments.
    pub fn similarity(&mut self, a: &str, b: &str) -> f32 {
        let a = self.tokens(a);
        let b = self.tokens(b);
        pair_score(&a, &b)
    }

    /// Average similarity over every unordered pair of responses. `None`
    /// when fewer than two responses are given.
    pub fn self_consistency(&mut self, responses: &[String]) -> Option<f32> {
        if responses.len() < 2 {
            return None;
        }
        let tokenized: Vec<Vec<String>> = responses.iter().map(|r| self.tokens(r)).collect();

        let mut total = 0.0f32;
        let mut pairs = 0usize;
        for i in 0..tokenized.len() {
            for j in (i + 1)..tokenized.len() {
                total += pair_score(&tokenized[i], &tokenized[j]);
                pairs += 1;
            }
        }
        Some(total / pairs as f32)
    }
}

fn pair_score(a: &[String], b: &[String]) -> f32 {
    (rouge_n(a, b, 1) + rouge_n(a, b, 2) + rouge_l(a, b)) / 3.0
}

fn f1(overlap: usize, a_len: usize, b_len: usize) -> f32 {
    if overlap == 0 || a_len == 0 || b_len == 0 {
        return 0.0;
    }
    let precision = overlap as f32 / a_len as f32;
    let recall = overlap as f32 / b_len as f32;
    2.0 * precision * recall / (precision + recall)
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for gram in tokens.windows(n) {
            *counts.entry(gram).or_insert(0) += 1;
        }
    }
    counts
}

/// Texts too short to hold any n-gram score 1.0 when their token sequences
/// are identical, so identical answers always saturate.
pub(crate) fn rouge_n(a: &[String], b: &[String], n: usize) -> f32 {
    let a_counts = ngram_counts(a, n);
    let b_counts = ngram_counts(b, n);
    let a_total: usize = a_counts.values().sum();
    let b_total: usize = b_counts.values().sum();
    if a_total == 0 && b_total == 0 {
        return if a == b { 1.0 } else { 0.0 };
    }
    let overlap: usize = a_counts
        .iter()
        .map(|(gram, &count)| count.min(b_counts.get(gram).copied().unwrap_or(0)))
        .sum();
    f1(overlap, a_total, b_total)
}

pub(crate) fn rouge_l(a: &[String], b: &[String]) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    f1(lcs_len(a, b), a.len(), b.len())
}

fn lcs_len(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            curr[j + 1] = if x == y {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
