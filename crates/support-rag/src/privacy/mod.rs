//! Privacy Filter
//!
//! Removes sensitive user data before a conversation leaves the process for
//! the large fallback model. Two stages run in order:
//!
//! 1. an ordered regex table (emails, phone numbers, card numbers, government
//!    identifiers, postal codes, URLs), earlier patterns winning;
//! 2. an [`EntityRecognizer`] that tags person, place and organisation names,
//!    each tagged literal then being replaced everywhere in the text.
//!
//! Every match becomes a `[REDACTED <LABEL>]` token. Redaction is idempotent.

pub mod entities;
pub mod ner_onnx;

use regex::Regex;
use std::sync::{Arc, LazyLock, OnceLock};

use crate::config::PrivacyConfig;
use crate::llm::ChatMessage;

pub use entities::{EntityKind, EntityRecognizer, EntitySpan, GazetteerRecognizer, NoopRecognizer};
pub use ner_onnx::OnnxNerRecognizer;

struct CompiledPattern {
    label: &'static str,
    regex: Regex,
}

/// Pattern table in precedence order.
const SENSITIVE_PATTERNS: &[(&str, &str)] = &[
    ("EMAIL", r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
    ("PHONE", r"(?:\+?1[-.\s]?)?\(?\b\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b"),
    ("CREDIT_CARD", r"\b(?:\d[ -]?){12,15}\d\b"),
    ("SSN", r"\b\d{3}-\d{2}-\d{4}\b"),
    ("SIN", r"\b\d{3}[ -]\d{3}[ -]\d{3}\b"),
    (
        "POSTAL_CODE",
        r"(?i)\b[ABCEGHJ-NPRSTVXY]\d[ABCEGHJ-NPRSTV-Z][ -]?\d[ABCEGHJ-NPRSTV-Z]\d\b|\b\d{5}-\d{4}\b",
    ),
    ("URL", r#"\b(?:https?://|www\.)[^\s<>"]+"#),
];

fn default_patterns() -> &'static Vec<CompiledPattern> {
    static PATTERNS: OnceLock<Vec<CompiledPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        SENSITIVE_PATTERNS
            .iter()
            .filter_map(|&(label, pattern)| match Regex::new(pattern) {
                Ok(regex) => Some(CompiledPattern { label, regex }),
                Err(e) => {
                    tracing::error!(label, error = %e, "Invalid redaction pattern skipped");
                    None
                }
            })
            .collect()
    })
}

static REDACTION_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[REDACTED [A-Z_]+\]").expect("redaction token regex is valid")
});

pub fn redaction_token(label: &str) -> String {
    format!("[REDACTED {}]", label)
}

/// Two-stage redactor shared by every session.
pub struct PrivacyFilter {
    recognizer: Arc<dyn EntityRecognizer>,
}

impl PrivacyFilter {
    pub fn new(recognizer: Arc<dyn EntityRecognizer>) -> Self {
        Self { recognizer }
    }

    /// Pattern stage only.
    pub fn patterns_only() -> Self {
        Self::new(Arc::new(NoopRecognizer))
    }

    /// Build the filter described by the privacy configuration: the ONNX NER
    /// model when a model directory is configured and loads, otherwise the
    /// gazetteer lists.
    pub fn from_config(config: &PrivacyConfig) -> anyhow::Result<Self> {
        if !config.entity_redaction {
            return Ok(Self::patterns_only());
        }
        if let Some(dir) = &config.ner_model_dir {
            match OnnxNerRecognizer::from_dir(dir) {
                Ok(recognizer) => return Ok(Self::new(Arc::new(recognizer))),
                Err(e) => tracing::warn!(
                    dir = %dir.display(),
                    error = %e,
                    "NER model unavailable, falling back to gazetteer"
                ),
            }
        }
        let gazetteer = GazetteerRecognizer::new(
            &config.known_people,
            &config.known_places,
            &config.known_organizations,
        )?;
        Ok(Self::new(Arc::new(gazetteer)))
    }

    pub fn recognizer_name(&self) -> &str {
        self.recognizer.name()
    }

    /// Redact a string, a list of strings or a conversation, preserving the
    /// input's shape.
    pub fn redact<T: Redactable>(&self, input: T) -> T {
        input.redact_with(self)
    }

    pub fn redact_text(&self, text: &str) -> String {
        let masked = redact_patterns(text);
        self.redact_entities(&masked)
    }

    fn redact_entities(&self, text: &str) -> String {
        let spans = match self.recognizer.recognize(text) {
            Ok(spans) => spans,
            Err(e) => {
                tracing::warn!(
                    recognizer = self.recognizer.name(),
                    error = %e,
                    "Entity recognition failed, keeping pattern redaction only"
                );
                return text.to_string();
            }
        };

        let tokens: Vec<(usize, usize)> = REDACTION_TOKEN
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect();

        let mut literals: Vec<(String, EntityKind)> = Vec::new();
        for span in spans {
            if tokens.iter().any(|&(s, e)| span.start < e && s < span.end) {
                continue;
            }
            let Some(literal) = span.text(text).map(str::trim) else {
                continue;
            };
            if literal.is_empty() || literals.iter().any(|(l, _)| l == literal) {
                continue;
            }
            literals.push((literal.to_string(), span.kind));
        }
        if literals.is_empty() {
            return text.to_string();
        }

        // Longest literal first so "Ada Lovelace" is replaced before "Ada".
        literals.sort_by_key(|(literal, _)| std::cmp::Reverse(literal.len()));
        tracing::debug!(entities = literals.len(), "Redacting named entities");

        let mut redacted = text.to_string();
        for (literal, kind) in literals {
            redacted = replace_literal(&redacted, &literal, &redaction_token(kind.label()));
        }
        redacted
    }
}

impl Default for PrivacyFilter {
    fn default() -> Self {
        Self::patterns_only()
    }
}

/// Pattern stage: each table entry in turn replaces its matches. Text already
/// turned into a redaction token by an earlier entry is left alone.
pub fn redact_patterns(text: &str) -> String {
    let mut redacted = text.to_string();
    for pattern in default_patterns() {
        if pattern.regex.is_match(&redacted) {
            let token = redaction_token(pattern.label);
            redacted = replace_outside_tokens(&redacted, &pattern.regex, &token);
        }
    }
    redacted
}

/// Replace whole-word occurrences of `literal` that lie outside existing
/// redaction tokens.
fn replace_literal(text: &str, literal: &str, token: &str) -> String {
    let escaped = regex::escape(literal);
    let starts_word = literal.chars().next().is_some_and(char::is_alphanumeric);
    let ends_word = literal.chars().last().is_some_and(char::is_alphanumeric);
    let pattern = format!(
        "{}{}{}",
        if starts_word { r"\b" } else { "" },
        escaped,
        if ends_word { r"\b" } else { "" }
    );
    let Ok(regex) = Regex::new(&pattern) else {
        return text.to_string();
    };
    replace_outside_tokens(text, &regex, token)
}

/// Run `regex` over the stretches of `text` between redaction tokens.
fn replace_outside_tokens(text: &str, regex: &Regex, token: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for token_match in REDACTION_TOKEN.find_iter(text) {
        let segment = &text[cursor..token_match.start()];
        out.push_str(&regex.replace_all(segment, regex::NoExpand(token)));
        out.push_str(token_match.as_str());
        cursor = token_match.end();
    }
    out.push_str(&regex.replace_all(&text[cursor..], regex::NoExpand(token)));
    out
}

/// Values the filter can redact without changing their shape.
pub trait Redactable: Sized {
    fn redact_with(self, filter: &PrivacyFilter) -> Self;
}

impl Redactable for String {
    fn redact_with(self, filter: &PrivacyFilter) -> Self {
        filter.redact_text(&self)
    }
}

impl Redactable for Vec<String> {
    fn redact_with(self, filter: &PrivacyFilter) -> Self {
        self.into_iter().map(|s| filter.redact_text(&s)).collect()
    }
}

impl Redactable for ChatMessage {
    fn redact_with(self, filter: &PrivacyFilter) -> Self {
        ChatMessage {
            content: filter.redact_text(&self.content),
            ..self
        }
    }
}

impl Redactable for Vec<ChatMessage> {
    fn redact_with(self, filter: &PrivacyFilter) -> Self {
        self.into_iter().map(|m| m.redact_with(filter)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatRole;

    fn gazetteer_filter() -> PrivacyFilter {
        let recognizer = GazetteerRecognizer::new(
            &["Ada Lovelace".to_string(), "Ada".to_string()],
            &["Toronto".to_string()],
            &["Acme".to_string()],
        )
        .unwrap();
        PrivacyFilter::new(Arc::new(recognizer))
    }

    struct FailingRecognizer;

    impl EntityRecognizer for FailingRecognizer {
        fn recognize(&self, _text: &str) -> anyhow::Result<Vec<EntitySpan>> {
            Err(anyhow::anyhow!("model crashed"))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_email_and_phone() {
        let filter = PrivacyFilter::patterns_only();
        assert_eq!(
            filter.redact("Contact me at a@b.com or 416-555-0100".to_string()),
            "Contact me at [REDACTED EMAIL] or [REDACTED PHONE]"
        );
    }

    #[test]
    fn test_pattern_table() {
        let cases = [
            ("card 4111 1111 1111 1111 ok", "card [REDACTED CREDIT_CARD] ok"),
            ("ssn 123-45-6789", "ssn [REDACTED SSN]"),
            ("sin 123 456 789", "sin [REDACTED SIN]"),
            ("ship to M5V 3L9 please", "ship to [REDACTED POSTAL_CODE] please"),
            ("zip 90210-1234", "zip [REDACTED POSTAL_CODE]"),
            ("see https://example.com/a?b=1 now", "see [REDACTED URL] now"),
            ("call (416) 555-0100", "call [REDACTED PHONE]"),
        ];
        for (input, expected) in cases {
            assert_eq!(redact_patterns(input), expected, "input: {}", input);
        }
    }

    #[test]
    fn test_url_does_not_swallow_earlier_tokens() {
        let redacted = redact_patterns("see https://shop.example.com/track?email=a@b.com now");
        assert_eq!(redacted, "see [REDACTED URL][REDACTED EMAIL] now");
        assert_eq!(REDACTION_TOKEN.find_iter(&redacted).count(), 2);
        assert_eq!(redact_patterns(&redacted), redacted);
    }

    #[test]
    fn test_plain_numbers_survive() {
        assert_eq!(
            redact_patterns("Order 536592 had 12 items for $20.00"),
            "Order 536592 had 12 items for $20.00"
        );
    }

    #[test]
    fn test_pattern_redaction_is_idempotent() {
        let once = redact_patterns("mail a@b.com, call +1 416 555 0100, visit www.shop.ca");
        assert_eq!(redact_patterns(&once), once);
        assert!(!once.contains("a@b.com"));
    }

    #[test]
    fn test_entity_stage_replaces_every_occurrence() {
        let filter = gazetteer_filter();
        let out = filter.redact_text("Ada Lovelace from Toronto. Tell Ada that Acme called.");
        assert_eq!(
            out,
            "[REDACTED PERSON] from [REDACTED LOCATION]. Tell [REDACTED PERSON] that [REDACTED ORGANIZATION] called."
        );
        assert_eq!(filter.redact_text(&out), out);
    }

    #[test]
    fn test_entity_stage_skips_existing_tokens() {
        let recognizer =
            GazetteerRecognizer::new(&["Redacted".to_string()], &[], &["Email".to_string()]).unwrap();
        let filter = PrivacyFilter::new(Arc::new(recognizer));
        let out = filter.redact_text("write to a@b.com");
        assert_eq!(out, "write to [REDACTED EMAIL]");
    }

    #[test]
    fn test_recognizer_failure_keeps_pattern_stage() {
        let filter = PrivacyFilter::new(Arc::new(FailingRecognizer));
        assert_eq!(filter.redact_text("mail a@b.com"), "mail [REDACTED EMAIL]");
    }

    #[test]
    fn test_shapes_are_preserved() {
        let filter = gazetteer_filter();
        let list = filter.redact(vec!["hi Ada".to_string(), "a@b.com".to_string()]);
        assert_eq!(list, vec!["hi [REDACTED PERSON]", "[REDACTED EMAIL]"]);

        let conversation = filter.redact(vec![
            ChatMessage::user("I'm Ada, email a@b.com"),
            ChatMessage::assistant("Thanks Ada"),
        ]);
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation[0].role, ChatRole::User);
        assert_eq!(
            conversation[0].content,
            "I'm [REDACTED PERSON], email [REDACTED EMAIL]"
        );
        assert_eq!(conversation[1].content, "Thanks [REDACTED PERSON]");
    }

    #[test]
    fn test_from_config() {
        let mut config = PrivacyConfig::default();
        config.known_people = vec!["Grace".to_string()];
        let filter = PrivacyFilter::from_config(&config).unwrap();
        assert_eq!(filter.recognizer_name(), "gazetteer");
        assert_eq!(filter.redact_text("Grace"), "[REDACTED PERSON]");

        config.entity_redaction = false;
        let filter = PrivacyFilter::from_config(&config).unwrap();
        assert_eq!(filter.recognizer_name(), "noop");
    }
}
