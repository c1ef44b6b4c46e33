//! Scalar normalization helpers shared by schema coercion and scoring

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Canonical date layout every recognised date is rendered to
pub const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%d";

/// Date layouts accepted on input, tried in order.
/// Slash-separated day/month is read month-first.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%d-%m-%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Lowercase and collapse every run of whitespace to a single space
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a date in any of the accepted layouts
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.len() < 6 || !s.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Render a date string in the canonical layout, if it is a date
pub fn canonical_date(s: &str) -> Option<String> {
    parse_date(s).map(|d| d.format(CANONICAL_DATE_FORMAT).to_string())
}

/// Parse a number written as text, tolerating currency signs, percent
/// signs and thousands separators
pub fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s
        .trim()
        .trim_start_matches(['$', '€', '£', '¥'])
        .trim_end_matches('%')
        .trim();

    if trimmed.is_empty() {
        return None;
    }

    let cleaned: String = trimmed.chars().filter(|c| *c != ',' && *c != '_').collect();
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parse a boolean written as text
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Compare two numbers under a relative tolerance.
///
/// A tolerance of `0.0` requires exact equality.
pub fn numbers_match(expected: f64, actual: f64, relative_tolerance: f64) -> bool {
    if expected == actual {
        return true;
    }
    if relative_tolerance <= 0.0 {
        return false;
    }
    (expected - actual).abs() <= relative_tolerance * expected.abs()
}
