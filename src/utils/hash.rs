//! Content fingerprinting
//!
//! The fingerprint identifies an article by normalized title + canonical URL.
//! Body content deliberately does not participate, so minor edits upstream
//! do not produce a new identity.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Stop words removed from titles before hashing
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
];

/// Query parameters that carry no identity
const TRACKING_PARAMS: &[&str] = &["utm_source", "utm_medium", "utm_campaign", "ref", "source"];

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static TRACKING_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    TRACKING_PARAMS
        .iter()
        .map(|param| Regex::new(&format!(r"[?&]{param}=[^&]*")).unwrap())
        .collect()
});
static PUNCTUATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static SIMILARITY_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(breaking|exclusive|update):\s*").unwrap());

/// Normalize a title for hashing: lowercase, strip punctuation, collapse
/// whitespace, drop stop words and tokens of length <= 2.
pub fn normalize_title(title: &str) -> String {
    if title.is_empty() {
        return String::new();
    }

    let lowered = title.to_lowercase();
    let no_punct = PUNCTUATION_RE.replace_all(&lowered, "");
    let collapsed = WHITESPACE_RE.replace_all(no_punct.trim(), " ");

    collapsed
        .split(' ')
        .filter(|word| word.chars().count() > 2 && !STOP_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonicalize a URL for hashing: lowercase, drop tracking params, strip
/// query and fragment, trim the trailing slash.
pub fn canonicalize_url(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }

    let mut normalized = url.trim().to_lowercase();

    for pattern in TRACKING_RES.iter() {
        normalized = pattern.replace_all(&normalized, "").into_owned();
    }

    if let Some(idx) = normalized.find(['?', '#']) {
        normalized.truncate(idx);
    }

    normalized.trim_end_matches('/').to_string()
}

/// 32-hex content fingerprint over normalized title and canonical URL
pub fn content_fingerprint(title: &str, url: &str) -> String {
    let input = format!("{}||{}", normalize_title(title), canonicalize_url(url));
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// 8-hex similarity hash over the leading 1000 characters of body content.
/// Diagnostics only: never used for equality decisions.
pub fn similarity_hash(content: &str) -> String {
    if content.is_empty() {
        return "00000000".to_string();
    }

    let sample: String = content.chars().take(1000).collect::<String>().to_lowercase();
    let stripped = TAG_RE.replace_all(&sample, "");
    let collapsed = WHITESPACE_RE.replace_all(stripped.trim(), " ");
    let normalized = SIMILARITY_PREFIX_RE.replace(&collapsed, "");

    let digest = Sha256::digest(normalized.as_bytes());
    digest[..4].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_title_normalization_drops_noise() {
        assert_eq!(
            normalize_title("The OpenAI  Launch, of GPT-6!"),
            "openai launch gpt6"
        );
        assert_eq!(normalize_title(""), "");
    }

    #[test]
    fn test_url_canonicalization() {
        assert_eq!(
            canonicalize_url("https://X.com/a?utm_source=twitter"),
            "https://x.com/a"
        );
        assert_eq!(
            canonicalize_url("https://x.com/a/#section"),
            "https://x.com/a"
        );
        assert_eq!(canonicalize_url("https://x.com/a/"), "https://x.com/a");
    }

    #[test]
    fn test_fingerprint_collision_pair() {
        // Same story with tracking params, case flips, and extra punctuation
        let a = content_fingerprint(
            "Breaking: OpenAI releases GPT-6",
            "https://x.com/a?utm_source=twitter",
        );
        let b = content_fingerprint("breaking:  OpenAI releases GPT-6!", "https://x.com/a");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_distinct_articles_differ() {
        let a = content_fingerprint("OpenAI releases GPT-6", "https://x.com/a");
        let b = content_fingerprint("Anthropic ships a new model", "https://x.com/b");
        assert_ne!(a, b);
    }

    #[test]
    fn test_similarity_hash_shape() {
        assert_eq!(similarity_hash(""), "00000000");
        let h = similarity_hash("<p>Some article body that goes on.</p>");
        assert_eq!(h.len(), 8);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_similarity_hash_ignores_prefix() {
        assert_eq!(
            similarity_hash("Breaking: markets rallied today"),
            similarity_hash("markets rallied today")
        );
    }

    proptest! {
        #[test]
        fn prop_fingerprint_case_insensitive(title in "[a-zA-Z ]{5,40}", path in "[a-z0-9/]{1,20}") {
            let url = format!("https://example.com/{path}");
            prop_assert_eq!(
                content_fingerprint(&title, &url),
                content_fingerprint(&title.to_uppercase(), &url.to_uppercase())
            );
        }

        #[test]
        fn prop_fingerprint_ignores_tracking(title in "[a-z ]{5,40}", path in "[a-z0-9/]{1,20}") {
            let url = format!("https://example.com/{path}");
            let tracked = format!("{url}?utm_source=feed&utm_campaign=x");
            prop_assert_eq!(content_fingerprint(&title, &url), content_fingerprint(&title, &tracked));
        }
    }
}
