//! Magnet link helpers
//!
//! The info-hash is the primary cache and dedup key throughout the resolver,
//! so it is always normalized to lowercase before use.

use url::Url;

const BTIH_PREFIX: &str = "urn:btih:";

/// Normalize an info-hash: trims, lowercases and validates it.
///
/// Accepts 40-char hex and 32-char base32 forms.
pub fn normalize_info_hash(hash: &str) -> Option<String> {
    let hash = hash.trim().to_lowercase();
    let valid = match hash.len() {
        40 => hash.chars().all(|c| c.is_ascii_hexdigit()),
        32 => hash
            .chars()
            .all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c)),
        _ => false,
    };
    valid.then_some(hash)
}

/// Extract the info-hash from a magnet link
pub fn parse_info_hash(magnet: &str) -> Option<String> {
    let url = Url::parse(magnet.trim()).ok()?;
    if url.scheme() != "magnet" {
        return None;
    }
    url.query_pairs()
        .filter(|(key, _)| key == "xt")
        .find_map(|(_, value)| {
            let lower = value.to_lowercase();
            lower
                .strip_prefix(BTIH_PREFIX)
                .and_then(normalize_info_hash)
        })
}

/// Build a minimal magnet link for an info-hash
pub fn build_magnet(info_hash: &str, display_name: Option<&str>) -> String {
    let mut magnet = format!("magnet:?xt={}{}", BTIH_PREFIX, info_hash.to_lowercase());
    if let Some(name) = display_name.filter(|n| !n.is_empty()) {
        magnet.push_str("&dn=");
        magnet.push_str(&urlencoding::encode(name));
    }
    magnet
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_normalize_info_hash() {
        assert_eq!(
            normalize_info_hash(&HASH.to_uppercase()).as_deref(),
            Some(HASH)
        );
        assert_eq!(
            normalize_info_hash("  abcdefghijklmnopqrstuvwxyz234567 ").as_deref(),
            Some("abcdefghijklmnopqrstuvwxyz234567")
        );
        assert!(normalize_info_hash("xyz").is_none());
        assert!(normalize_info_hash(&"g".repeat(40)).is_none());
    }

    #[test]
    fn test_parse_info_hash() {
        let magnet = format!(
            "magnet:?xt=urn:btih:{}&dn=Some.Show.S01&tr=udp%3A%2F%2Ftracker",
            HASH.to_uppercase()
        );
        assert_eq!(parse_info_hash(&magnet).as_deref(), Some(HASH));
        assert!(parse_info_hash("https://example.com/?xt=urn:btih:abc").is_none());
        assert!(parse_info_hash("magnet:?dn=nothing").is_none());
    }

    #[test]
    fn test_build_magnet_roundtrip() {
        let magnet = build_magnet(HASH, Some("Show S01 1080p"));
        assert!(magnet.contains("dn=Show%20S01%201080p"));
        assert_eq!(parse_info_hash(&magnet).as_deref(), Some(HASH));
        assert_eq!(
            build_magnet(HASH, None),
            format!("magnet:?xt=urn:btih:{}", HASH)
        );
    }
}
