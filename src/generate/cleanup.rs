//! Text helpers for model input and output.

use regex::Regex;
use scraper::Html;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:html)?\s*").expect("valid regex"));

/// Document wrappers a model sometimes emits around a fragment.
static DOCUMENT_WRAPPERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?is)<!DOCTYPE html>.*?<body[^>]*>",
        r"(?is)</body>.*?</html>",
        r"(?is)<head>.*?</head>",
        r"(?i)</?html[^>]*>",
        r"(?i)</?body[^>]*>",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Pictographs, dingbats, flags and the joiners used to compose them.
static EMOJI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x{1F000}-\x{1FAFF}\x{2600}-\x{27BF}\x{2B50}\x{2B55}\x{FE0F}\x{200D}]+")
        .expect("valid regex")
});

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n(?:[ \t\r]*\n)*").expect("valid regex"));

static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

/// UTF-8 punctuation that was decoded as Mac Roman somewhere upstream.
const MOJIBAKE: &[(&str, &str)] = &[
    ("\u{201A}\u{00C4}\u{00F4}", "'"),
    ("\u{201A}\u{00C4}\u{00F9}", "\""),
    ("\u{201A}\u{00C4}\u{00FA}", "\""),
    ("\u{201A}\u{00C4}\u{00EC}", "-"),
    ("\u{201A}\u{00C4}\u{00EE}", "\u{2014}"),
    ("\u{00C4}\u{00F4}", "'"),
    ("\u{00C4}\u{00F9}", "\""),
    ("\u{00C4}\u{00FA}", "\""),
    ("\u{00C4}\u{00EC}", "-"),
    ("\u{00C4}\u{00EE}", "\u{2014}"),
    ("\u{00D4}\u{220F}\u{00E8}", ""),
];

/// Clean a generated HTML fragment.
///
/// Strips code fences and document wrappers, removes emoji and mojibake,
/// drops C1 control characters and anything outside the Basic Multilingual
/// Plane, then collapses runs of blank lines.
pub fn clean_html(raw: &str) -> String {
    let mut content = CODE_FENCE.replace_all(raw, "").into_owned();
    for wrapper in DOCUMENT_WRAPPERS.iter() {
        content = wrapper.replace_all(&content, "").into_owned();
    }
    content = EMOJI.replace_all(&content, "").into_owned();
    for (broken, fixed) in MOJIBAKE {
        content = content.replace(broken, fixed);
    }
    let content: String = content
        .chars()
        .filter(|c| !('\u{80}'..='\u{9F}').contains(c) && (*c as u32) <= 0xFFFF)
        .collect();
    BLANK_LINES
        .replace_all(&content, "\n\n")
        .trim()
        .to_string()
}

/// Visible text of an HTML fragment, whitespace collapsed.
pub fn plain_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Parse the span from the first `{` to the last `}` as a JSON object.
///
/// Anything that is not a JSON object yields an empty map.
pub fn extract_json_object(reply: &str) -> Map<String, Value> {
    JSON_OBJECT
        .find(reply)
        .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_html_strips_fences_and_wrappers() {
        let raw = "```html\n<!DOCTYPE html>\n<html lang=\"en\">\n<head><title>x</title></head>\n<body>\n<div class=\"product-description\"><h2>Rose</h2></div>\n</body>\n</html>\n```";
        assert_eq!(
            clean_html(raw),
            "<div class=\"product-description\"><h2>Rose</h2></div>"
        );
    }

    #[test]
    fn test_clean_html_removes_emoji_and_mojibake() {
        let raw = "<p>Fresh \u{1F33F} and bright \u{2728}</p>\n<p>It\u{201A}\u{00C4}\u{00F4}s great</p>";
        assert_eq!(clean_html(raw), "<p>Fresh  and bright </p>\n<p>It's great</p>");
    }

    #[test]
    fn test_clean_html_keeps_non_latin_text() {
        assert_eq!(clean_html("<p>Caf\u{e9} \u{6ce2}</p>"), "<p>Caf\u{e9} \u{6ce2}</p>");
    }

    #[test]
    fn test_clean_html_collapses_blank_lines() {
        let raw = "\n\n<h2>A</h2>\n   \n\n \n<p>B</p>\n\n";
        assert_eq!(clean_html(raw), "<h2>A</h2>\n\n<p>B</p>");
    }

    #[test]
    fn test_plain_text_decodes_entities() {
        let html = "<p>Smoky &amp; sweet</p>\n<ul><li>oud</li><li>amber</li></ul>";
        assert_eq!(plain_text(html), "Smoky & sweet oud amber");
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("caf\u{e9} noir", 4), "caf\u{e9}");
        assert_eq!(truncate_chars("short", 50), "short");
    }

    #[test]
    fn test_extract_json_object_with_surrounding_text() {
        let reply = "Here you go:\n```json\n{\"longevity\": \"8 hours\", \"seasons\": [\"fall\"]}\n```";
        let map = extract_json_object(reply);
        assert_eq!(map["longevity"], "8 hours");
        assert_eq!(map["seasons"][0], "fall");
    }

    #[test]
    fn test_extract_json_object_failures_are_empty() {
        assert!(extract_json_object("no json here").is_empty());
        assert!(extract_json_object("{not valid}").is_empty());
        assert!(extract_json_object("[1, 2]").is_empty());
    }
}
