//! Shared utility functions used across multiple modules.

use std::sync::OnceLock;

use regex::Regex;

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Trim every entry, drop empties and duplicates, keep first-seen order.
pub fn normalize_list(values: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        if let Some(value) = normalize_text_option(Some(value)) {
            if !normalized.contains(&value) {
                normalized.push(value);
            }
        }
    }
    normalized
}

/// Case-insensitive membership test for field-name lists.
pub fn contains_field(list: &[String], field: &str) -> bool {
    list.iter().any(|candidate| candidate.eq_ignore_ascii_case(field))
}

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(i32::try_from(decimals).unwrap_or(i32::MAX));
    (value * factor).round() / factor
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Regex compiled on first use and reused while its source is unchanged.
#[derive(Debug, Clone, Default)]
pub struct RegexCache(OnceLock<(String, Result<Regex, regex::Error>)>);

impl RegexCache {
    pub fn is_match(&self, source: &str, haystack: &str) -> Result<bool, regex::Error> {
        let (cached, compiled) = self
            .0
            .get_or_init(|| (source.to_string(), Regex::new(source)));
        if cached == source {
            compiled
                .as_ref()
                .map(|regex| regex.is_match(haystack))
                .map_err(Clone::clone)
        } else {
            Regex::new(source).map(|regex| regex.is_match(haystack))
        }
    }
}

// The cache is derived state; configs compare by their source strings.
impl PartialEq for RegexCache {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}
