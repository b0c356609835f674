//! Text cleaning for feed content
//!
//! Strips markup, preserves block formatting, normalizes unicode, and
//! removes the boilerplate that syndication feeds drag along.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Node};
use unicode_normalization::UnicodeNormalization;

/// Tags whose entire subtree is discarded
const REMOVE_TAGS: &[&str] = &[
    "script", "style", "meta", "link", "noscript", "iframe", "embed", "object", "applet", "form",
];

/// Separator emitted before the content of a block-level tag
fn block_separator(tag: &str) -> Option<&'static str> {
    match tag {
        "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Some("\n\n"),
        "br" | "div" => Some("\n"),
        "li" => Some("\n\u{2022} "),
        "blockquote" => Some("\n\""),
        "hr" => Some("\n---\n"),
        _ => None,
    }
}

static JUNK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Social media sharing text
        r"share\s+on\s+(facebook|twitter|linkedin|whatsapp)",
        r"follow\s+us\s+on\s+(facebook|twitter|instagram)",
        r"like\s+us\s+on\s+facebook",
        // Advertisement indicators; the ad marker requires its brackets so
        // words like "read" survive
        r"advertisement\s*:?\s*",
        r"\[\s*ad\s*\]",
        r"sponsored\s+content",
        // Newsletter prompts
        r"subscribe\s+to\s+our\s+newsletter",
        r"sign\s+up\s+for\s+updates",
        // Copyright and legal tails
        r"©\s*\d{4}.*?all\s+rights\s+reserved",
        r"terms\s+of\s+use",
        r"privacy\s+policy",
        // Feed metadata labels
        r"filed\s+under\s*:",
        r"tags\s*:",
        r"category\s*:",
        // Read-more tails
        r"read\s+more\s*\.{3}",
        r"continue\s+reading",
        r"full\s+story\s+here",
        // Image and agency credits
        r"image\s*:\s*getty\s+images",
        r"photo\s*:\s*reuters",
        r"source\s*:\s*[a-zA-Z\s]+",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?im){p}")).unwrap())
    .collect()
});

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static MULTI_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());
static CRLF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r\n?").unwrap());
static MULTI_NEWLINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Clean markup out of feed content, returning plain text or None when
/// nothing survives.
pub fn clean_html_content(html: &str) -> Option<String> {
    if html.trim().is_empty() {
        return None;
    }

    let fragment = Html::parse_fragment(html);
    let mut text = String::with_capacity(html.len());
    extract_text(&fragment, &mut text);

    let cleaned = post_process(&text);
    if cleaned.is_empty() {
        // Parser produced nothing useful; fall back to a bare tag strip.
        let stripped = simple_strip(html);
        if stripped.is_empty() {
            return None;
        }
        return Some(stripped);
    }
    Some(cleaned)
}

fn extract_text(fragment: &Html, out: &mut String) {
    fn walk(node: ego_tree::NodeRef<'_, Node>, out: &mut String) {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => {
                let name = element.name();
                if REMOVE_TAGS.contains(&name) {
                    return;
                }
                if let Some(sep) = block_separator(name) {
                    out.push_str(sep);
                }
                for child in node.children() {
                    walk(child, out);
                }
                if name == "blockquote" {
                    out.push('"');
                }
            }
            _ => {
                for child in node.children() {
                    walk(child, out);
                }
            }
        }
    }

    walk(fragment.tree.root(), out);
}

fn post_process(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    // Compatibility composition keeps ligatures and width variants stable
    let mut normalized: String = text.nfkc().collect();

    for pattern in JUNK_PATTERNS.iter() {
        normalized = pattern.replace_all(&normalized, "").into_owned();
    }

    let normalized = normalize_whitespace(&normalized);

    let mut lines: Vec<&str> = Vec::new();
    for line in normalized.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let start = lines.len().saturating_sub(3);
        if lines[start..].contains(&line) {
            continue;
        }
        lines.push(line);
    }

    let joined = lines.join("\n");
    MULTI_NEWLINE_RE.replace_all(&joined, "\n\n").trim().to_string()
}

fn normalize_whitespace(text: &str) -> String {
    let text = text.replace('\t', " ");
    let text = CRLF_RE.replace_all(&text, "\n");
    MULTI_SPACE_RE.replace_all(&text, " ").into_owned()
}

fn simple_strip(html: &str) -> String {
    let stripped = TAG_RE.replace_all(html, "");
    normalize_whitespace(&stripped).trim().to_string()
}

/// Clean a title: markup out, newlines folded into spaces.
pub fn clean_title(title: &str) -> Option<String> {
    clean_html_content(title).map(|t| t.replace('\n', " ").trim().to_string())
}

/// Number of whitespace-separated words
pub fn word_count(content: &str) -> usize {
    content.split_whitespace().count()
}

/// Extract a summary from cleaned content: first paragraph if it fits,
/// otherwise greedy sentence fill, otherwise a word-boundary truncation.
pub fn extract_summary(content: &str, max_length: usize) -> String {
    if content.is_empty() {
        return String::new();
    }

    let first_paragraph = content.split("\n\n").next().unwrap_or("").trim();
    if first_paragraph.chars().count() <= max_length {
        return first_paragraph.to_string();
    }

    let mut summary = String::new();
    for sentence in first_paragraph.split(". ") {
        let candidate_len = summary.chars().count() + sentence.chars().count() + 2;
        if candidate_len > max_length {
            break;
        }
        summary.push_str(sentence);
        summary.push_str(". ");
    }
    if !summary.trim().is_empty() {
        return summary.trim().to_string();
    }

    let mut truncated = String::new();
    for word in first_paragraph.split_whitespace() {
        if truncated.chars().count() + word.chars().count() + 1 > max_length.saturating_sub(3) {
            break;
        }
        truncated.push_str(word);
        truncated.push(' ');
    }
    if !truncated.trim().is_empty() {
        return format!("{}...", truncated.trim());
    }

    let head: String = first_paragraph
        .chars()
        .take(max_length.saturating_sub(3))
        .collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_script_subtrees() {
        let html = "<p>Real text.</p><script>alert('gone')</script><p>More text.</p>";
        let cleaned = clean_html_content(html).unwrap();
        assert!(cleaned.contains("Real text."));
        assert!(cleaned.contains("More text."));
        assert!(!cleaned.contains("alert"));
    }

    #[test]
    fn test_preserves_block_formatting() {
        let html = "<ul><li>first</li><li>second</li></ul>";
        let cleaned = clean_html_content(html).unwrap();
        assert!(cleaned.contains("\u{2022} first"));
        assert!(cleaned.contains("\u{2022} second"));
    }

    #[test]
    fn test_decodes_entities() {
        let cleaned = clean_html_content("<p>Ben &amp; Jerry &lt;3</p>").unwrap();
        assert_eq!(cleaned, "Ben & Jerry <3");
    }

    #[test]
    fn test_strips_junk_patterns() {
        let html = "<p>Story body here.</p><p>Subscribe to our newsletter</p>";
        let cleaned = clean_html_content(html).unwrap();
        assert!(cleaned.contains("Story body here."));
        assert!(!cleaned.to_lowercase().contains("subscribe"));
    }

    #[test]
    fn test_strips_credit_and_label_tails() {
        let html = "<p>Story body here.</p><p>Source: Reuters</p><p>[AD] Category: Politics</p>";
        let cleaned = clean_html_content(html).unwrap();
        assert!(cleaned.contains("Story body here."));
        assert!(!cleaned.contains("Reuters"));
        assert!(!cleaned.contains("[AD]"));
        assert!(!cleaned.to_lowercase().contains("category:"));
    }

    #[test]
    fn test_ad_marker_requires_brackets() {
        let cleaned = clean_html_content("<p>Read the whole roadmap today.</p>").unwrap();
        assert_eq!(cleaned, "Read the whole roadmap today.");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(clean_html_content(""), None);
        assert_eq!(clean_html_content("   "), None);
    }

    #[test]
    fn test_summary_short_paragraph_passthrough() {
        let content = "A short opening paragraph.";
        assert_eq!(extract_summary(content, 300), content);
    }

    #[test]
    fn test_summary_sentence_fill() {
        let content = format!(
            "First sentence here. Second sentence follows. {}",
            "x".repeat(300)
        );
        let summary = extract_summary(&content, 60);
        assert_eq!(summary, "First sentence here. Second sentence follows.");
    }

    #[test]
    fn test_summary_word_boundary_fallback() {
        let content = format!("word{} and more text here", "x".repeat(100));
        let summary = extract_summary(&content, 40);
        assert!(summary.ends_with("..."));
        assert!(summary.chars().count() <= 40);
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count("one two  three\nfour"), 4);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn test_clean_title_folds_newlines() {
        let title = clean_title("<h1>Two\nLines</h1>").unwrap();
        assert_eq!(title, "Two Lines");
    }
}
