use regex::Regex;
use std::sync::LazyLock;

/// Phrases that mark an answer as untrustworthy, matched as substrings of the
/// normalised answer.
pub const DISQUALIFYING_PHRASES: &[&str] = &[
    // apology
    "sorry",
    "apologize",
    "apologies",
    // disclaimers
    "restricted",
    "i cannot access",
    "i dont have access",
    "i do not have access",
    // vendor self-reference
    "microsoft",
    "openai",
    "language model",
    "artificial intelligence",
    // uncertainty
    "unsure",
    "not sure",
    "not certain",
    "i dont know",
    "i do not know",
];

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\s]").expect("strip regex is valid"));

static HEDGING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bas (?:a|an|the)\b").expect("hedging regex is valid"));

/// Lower-cased answer with everything but ASCII letters, digits and
/// whitespace removed.
pub fn normalize_answer(answer: &str) -> String {
    NON_ALPHANUMERIC
        .replace_all(&answer.to_lowercase(), "")
        .into_owned()
}

/// Why an answer failed the lexical check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerbalizedRejection {
    Empty,
    Phrase(&'static str),
    Hedging,
}

/// Cheap lexical check on the small model's answer. `Ok(())` means the
/// answer may go on to the self-consistency check.
pub fn check_verbalized(answer: &str) -> Result<(), VerbalizedRejection> {
    let normalized = normalize_answer(answer);
    if normalized.trim().is_empty() {
        return Err(VerbalizedRejection::Empty);
    }
    if HEDGING.is_match(&normalized) {
        return Err(VerbalizedRejection::Hedging);
    }
    match DISQUALIFYING_PHRASES
        .iter()
        .copied()
        .find(|phrase| normalized.contains(phrase))
    {
        Some(phrase) => Err(VerbalizedRejection::Phrase(phrase)),
        None => Ok(()),
    }
}

pub fn is_verbally_confident(answer: &str) -> bool {
    check_verbalized(answer).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_answer("I'm NOT sure!"), "im not sure");
    }

    #[test]
    fn test_rejections() {
        assert_eq!(
            check_verbalized("I'm not sure, let me check."),
            Err(VerbalizedRejection::Phrase("not sure"))
        );
        assert_eq!(
            check_verbalized("Sorry, I can't see that order."),
            Err(VerbalizedRejection::Phrase("sorry"))
        );
        assert_eq!(
            check_verbalized("As an AI developed by Microsoft..."),
            Err(VerbalizedRejection::Hedging)
        );
        assert_eq!(check_verbalized("  ...  "), Err(VerbalizedRejection::Empty));
    }

    #[test]
    fn test_confident_answers_pass() {
        assert!(is_verbally_confident(
            "Your order 536592 was delivered on 2010-12-04."
        ));
        // "as" followed by something other than an article is fine.
        assert!(is_verbally_confident("It ships as soon as payment clears."));
        // Articles glued to other words are not hedging.
        assert!(is_verbally_confident("Pay with Visa or Mastercard."));
    }
}
