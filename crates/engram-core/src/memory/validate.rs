//! Content validation shared by the store path and supersede
//!
//! Catches garbled model output before it lands in the graph: content that
//! is mostly punctuation, content that is one word stuttered over and over,
//! and content too short to be a real memory.

use chrono::{DateTime, NaiveDate, Utc};

use super::NodeType;

/// Minimum content length for non-entity nodes
pub const MIN_CONTENT_LEN: usize = 10;

/// Fraction of alphanumeric characters below which content counts as garbled
const MIN_ALNUM_RATIO: f64 = 0.30;

/// Fraction of repeats of the most common word above which content counts as garbled
const MAX_REPEAT_RATIO: f64 = 0.50;

/// Why a piece of content was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentRejection {
    Garbled,
    RepeatedWords,
    TooShort,
}

impl std::fmt::Display for ContentRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentRejection::Garbled => write!(f, "content is mostly punctuation or whitespace"),
            ContentRejection::RepeatedWords => write!(f, "content repeats the same word excessively"),
            ContentRejection::TooShort => {
                write!(f, "content shorter than {} characters", MIN_CONTENT_LEN)
            }
        }
    }
}

/// Fraction of characters that survive stripping whitespace and punctuation
pub fn alnum_ratio(content: &str) -> f64 {
    let total = content.chars().count();
    if total == 0 {
        return 0.0;
    }
    let kept = content.chars().filter(|c| c.is_alphanumeric()).count();
    kept as f64 / total as f64
}

/// Fraction of words that are the single most frequent word
pub fn repeated_word_ratio(content: &str) -> f64 {
    let words: Vec<String> = content
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();
    if words.len() < 4 {
        return 0.0;
    }
    let mut counts = std::collections::HashMap::new();
    for word in &words {
        *counts.entry(word.as_str()).or_insert(0usize) += 1;
    }
    let max = counts.values().copied().max().unwrap_or(0);
    max as f64 / words.len() as f64
}

/// Validate content for storage. Entities are exempt from the length
/// minimum (short proper names are fine).
pub fn check_content(content: &str, node_type: NodeType) -> Result<(), ContentRejection> {
    if alnum_ratio(content) < MIN_ALNUM_RATIO {
        return Err(ContentRejection::Garbled);
    }
    if repeated_word_ratio(content) > MAX_REPEAT_RATIO {
        return Err(ContentRejection::RepeatedWords);
    }
    if node_type != NodeType::Entity && content.trim().len() < MIN_CONTENT_LEN {
        return Err(ContentRejection::TooShort);
    }
    Ok(())
}

/// Validate replacement content for supersede: garbled test plus the
/// length minimum for non-entities. Word repetition is not re-checked
/// here; corrections legitimately restate names.
pub fn check_replacement(content: &str, node_type: NodeType) -> Result<(), ContentRejection> {
    if alnum_ratio(content) < MIN_ALNUM_RATIO {
        return Err(ContentRejection::Garbled);
    }
    if node_type != NodeType::Entity && content.trim().len() < MIN_CONTENT_LEN {
        return Err(ContentRejection::TooShort);
    }
    Ok(())
}

/// Scope must sit inside [0, 1]
pub fn check_scope(scope: f64) -> bool {
    (0.0..=1.0).contains(&scope)
}

/// Parse a plan date: RFC3339 or bare `YYYY-MM-DD` (midnight UTC)
pub fn parse_plan_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
