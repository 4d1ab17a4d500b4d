//! Shared text normalization and comparison utilities
//!
//! Used by the movie-pack scorer to compare release filenames against the
//! title candidates supplied by the caller.

use strsim::normalized_levenshtein;

/// Normalize a title for matching.
/// Drops apostrophes, turns every other non-alphanumeric character into a
/// separator and collapses whitespace.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .replace(['\'', '\u{2019}'], "")
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a title into normalized words
pub fn title_words(title: &str) -> Vec<String> {
    normalize_title(title)
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Fraction (0.0 to 1.0) of the title's words that appear in the candidate
pub fn word_overlap_ratio(title: &str, candidate: &str) -> f64 {
    let wanted = title_words(title);
    if wanted.is_empty() {
        return 0.0;
    }
    let present = title_words(candidate);
    let hits = wanted.iter().filter(|w| present.contains(w)).count();
    hits as f64 / wanted.len() as f64
}

/// Whether `needle` appears in `haystack` as a whole normalized word
pub fn contains_word(haystack: &str, needle: &str) -> bool {
    let needle = normalize_title(needle);
    !needle.is_empty() && title_words(haystack).iter().any(|w| *w == needle)
}

/// Calculate similarity between two titles (0.0 to 1.0)
pub fn title_similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&normalize_title(a), &normalize_title(b))
}
