//! Chat text normalization used by the phrase and all-caps checks.

const PUNCTUATION: &[char] = &[
    '.', ',', '!', '@', '#', '$', '%', '^', '&', '*', '(', ')', '{', '}', '<', '>', '[', ']',
    '\\', '-', '_', '+', '=', ':', ';', '\'', '`', '~', '"',
];

/// Drop punctuation, then collapse every whitespace run (newlines included)
/// into a single space. Leading and trailing whitespace is removed.
pub fn normalize(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| !PUNCTUATION.contains(c)).collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn normalize_lower(text: &str) -> String {
    normalize(text).to_lowercase()
}

pub fn normalize_upper(text: &str) -> String {
    normalize(text).to_uppercase()
}

/// Normalized text with the remaining spaces removed.
pub fn compact(text: &str) -> String {
    normalize(text).replace(' ', "")
}

/// Whether `text` is shouting: at least `min_length` characters once
/// normalized and compacted, containing a letter, and unchanged by
/// upper-casing.
pub fn is_all_caps(text: &str, min_length: usize) -> bool {
    let compacted = compact(text);
    if compacted.chars().count() < min_length {
        return false;
    }
    if !compacted.chars().any(char::is_alphabetic) {
        return false;
    }
    compacted == compacted.to_uppercase()
}
