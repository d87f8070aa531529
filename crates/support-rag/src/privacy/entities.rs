use anyhow::{anyhow, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Named-entity classes removed by the entity stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Person,
    Place,
    Organization,
}

impl EntityKind {
    /// Label used inside the `[REDACTED <LABEL>]` token.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Person => "PERSON",
            EntityKind::Place => "LOCATION",
            EntityKind::Organization => "ORGANIZATION",
        }
    }
}

/// A tagged span as byte offsets into the recognised text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySpan {
    pub start: usize,
    pub end: usize,
    pub kind: EntityKind,
}

impl EntitySpan {
    pub fn text<'a>(&self, source: &'a str) -> Option<&'a str> {
        source.get(self.start..self.end)
    }
}

/// Tags person, place and organisation names in free text.
pub trait EntityRecognizer: Send + Sync {
    fn recognize(&self, text: &str) -> Result<Vec<EntitySpan>>;

    fn name(&self) -> &str;
}

/// Recognises nothing. Used when entity redaction is switched off.
pub struct NoopRecognizer;

impl EntityRecognizer for NoopRecognizer {
    fn recognize(&self, _text: &str) -> Result<Vec<EntitySpan>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Case-insensitive whole-word lookup of configured names.
pub struct GazetteerRecognizer {
    patterns: Vec<(EntityKind, Regex)>,
}

impl GazetteerRecognizer {
    pub fn new(people: &[String], places: &[String], organizations: &[String]) -> Result<Self> {
        let mut patterns = Vec::new();
        for (kind, names) in [
            (EntityKind::Person, people),
            (EntityKind::Place, places),
            (EntityKind::Organization, organizations),
        ] {
            if let Some(regex) = Self::compile(names)? {
                patterns.push((kind, regex));
            }
        }
        tracing::debug!(kinds = patterns.len(), "Built gazetteer recognizer");
        Ok(Self { patterns })
    }

    fn compile(names: &[String]) -> Result<Option<Regex>> {
        let mut names: Vec<&str> = names
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            return Ok(None);
        }
        // Longest alternative first so "New York City" beats "New York".
        names.sort_by_key(|n| std::cmp::Reverse(n.len()));
        let alternation = names
            .iter()
            .map(|n| regex::escape(n))
            .collect::<Vec<_>>()
            .join("|");
        let regex = RegexBuilder::new(&format!(r"\b(?:{})\b", alternation))
            .case_insensitive(true)
            .build()
            .map_err(|e| anyhow!("Invalid gazetteer pattern: {}", e))?;
        Ok(Some(regex))
    }
}

impl EntityRecognizer for GazetteerRecognizer {
    fn recognize(&self, text: &str) -> Result<Vec<EntitySpan>> {
        let mut spans: Vec<EntitySpan> = self
            .patterns
            .iter()
            .flat_map(|(kind, regex)| {
                regex.find_iter(text).map(move |m| EntitySpan {
                    start: m.start(),
                    end: m.end(),
                    kind: *kind,
                })
            })
            .collect();
        spans.sort_by_key(|s| s.start);
        Ok(spans)
    }

    fn name(&self) -> &str {
        "gazetteer"
    }
}
