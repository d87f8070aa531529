//! Invoice number and date extraction for order lookups.

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use std::sync::LazyLock;

/// Six-digit invoice number with an optional single-letter prefix
/// (`C536379` is a return). Applied to the upper-cased query.
static INVOICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z]?)(\d{6})\b").expect("invoice regex is valid")
});

static ISO_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("iso date regex is valid")
});

static NUMERIC_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4}|\d{2})\b").expect("numeric date regex is valid")
});

const MONTH: &str = r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)";

static MONTH_DAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b{}\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?\b(?:,?\s+(\d{{4}})\b)?",
        MONTH
    ))
    .expect("month-day regex is valid")
});

static DAY_MONTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?{}\b(?:,?\s+(\d{{4}})\b)?",
        MONTH
    ))
    .expect("day-month regex is valid")
});

static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d+)\s+(day|week)s?\s+ago\b").expect("relative date regex is valid")
});

/// First invoice number in the query, prefix included.
pub fn extract_invoice_number(query: &str) -> Option<String> {
    let upper = query.to_uppercase();
    INVOICE_RE
        .captures(&upper)
        .map(|caps| format!("{}{}", &caps[1], &caps[2]))
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Resolve a date with an optional year. Without a year the most recent
/// occurrence on or before `today` is used.
fn resolve(year: Option<i32>, month: u32, day: u32, today: NaiveDate) -> Option<NaiveDate> {
    match year {
        Some(y) => NaiveDate::from_ymd_opt(y, month, day),
        None => {
            let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
            match this_year {
                Some(d) if d <= today => Some(d),
                _ => NaiveDate::from_ymd_opt(today.year() - 1, month, day),
            }
        }
    }
}

/// Extract a calendar date from free text, relative to `today`.
///
/// Explicit dates win over relative phrases. Returns `None` when nothing
/// date-like is found or the date does not exist.
pub fn extract_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lower = text.to_lowercase();

    if let Some(caps) = ISO_DATE_RE.captures(&lower) {
        let year = caps[1].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, caps[2].parse().ok()?, caps[3].parse().ok()?);
    }

    if let Some(caps) = NUMERIC_DATE_RE.captures(&lower) {
        let mut year: i32 = caps[3].parse().ok()?;
        if year < 100 {
            year += 2000;
        }
        return NaiveDate::from_ymd_opt(year, caps[1].parse().ok()?, caps[2].parse().ok()?);
    }

    if let Some(caps) = MONTH_DAY_RE.captures(&lower) {
        let month = month_number(&caps[1])?;
        let day = caps[2].parse().ok()?;
        let year = caps.get(3).and_then(|y| y.as_str().parse().ok());
        return resolve(year, month, day, today);
    }

    if let Some(caps) = DAY_MONTH_RE.captures(&lower) {
        let day = caps[1].parse().ok()?;
        let month = month_number(&caps[2])?;
        let year = caps.get(3).and_then(|y| y.as_str().parse().ok());
        return resolve(year, month, day, today);
    }

    if let Some(caps) = RELATIVE_RE.captures(&lower) {
        let n: i64 = caps[1].parse().ok()?;
        let days = if &caps[2] == "week" { n.checked_mul(7)? } else { n };
        return today.checked_sub_signed(Duration::try_days(days)?);
    }

    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    if words.contains(&"yesterday") {
        return today.pred_opt();
    }
    if words.contains(&"today") {
        return Some(today);
    }
    if words.windows(2).any(|w| w == ["last", "week"]) {
        return today.checked_sub_signed(Duration::days(7));
    }

    None
}
