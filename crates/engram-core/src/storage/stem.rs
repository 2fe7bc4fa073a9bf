//! Lightweight suffix stemmer for LIKE-based topic matching
//!
//! Not a linguistic stemmer; just enough to make "writing", "writes" and
//! "writer" land on the same LIKE pattern. Embedding retrieval never uses it.

/// Consonant+"ing" endings stripped before the generic suffix pass
const ING_SUFFIXES: [&str; 8] = [
    "ting", "sing", "ning", "ling", "ring", "ding", "ping", "ying",
];

/// Generic suffixes, longest first
const SUFFIXES: [&str; 7] = ["ied", "ies", "ing", "ed", "er", "es", "ly"];

/// Stem a single lowercased word. Words shorter than 4 characters are
/// returned unchanged.
pub fn stem(word: &str) -> String {
    let word = word.to_lowercase();
    if word.len() < 4 {
        return word;
    }

    for suffix in ING_SUFFIXES {
        if let Some(base) = word.strip_suffix(suffix) {
            if base.len() >= 3 {
                return base.to_string();
            }
        }
    }

    for suffix in SUFFIXES {
        if let Some(base) = word.strip_suffix(suffix) {
            if base.len() >= 3 {
                return base.to_string();
            }
        }
    }

    if word.ends_with('s') && !word.ends_with("ss") && word.len() - 1 >= 4 {
        return word[..word.len() - 1].to_string();
    }

    word
}

/// Split a topic into stems of its meaningful tokens (length > 2)
pub fn topic_stems(topic: &str) -> Vec<String> {
    let mut stems: Vec<String> = topic
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(stem)
        .collect();
    stems.dedup();
    stems
}
