use once_cell::sync::Lazy;
use regex::Regex;

static MARKUP_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[A-Za-z][A-Za-z0-9:_-]*[^>]*>").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Maximum snippet length in characters.
pub const SNIPPET_CHARS: usize = 300;

pub fn clean_html_entities(text: &str) -> String {
    let mut cleaned = text.to_string();
    // Sources double-encode now and then
    for _ in 0..2 {
        let decoded = html_escape::decode_html_entities(&cleaned).into_owned();
        if decoded == cleaned {
            break;
        }
        cleaned = decoded;
    }
    cleaned
}

pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Remove JATS/HTML tags (e.g. `<jats:p>`, `<i>`) and decode entities.
pub fn strip_markup(text: &str) -> String {
    let without_tags = MARKUP_TAG.replace_all(text, " ");
    collapse_whitespace(&clean_html_entities(&without_tags))
}

/// Cut `text` to at most `max_chars` characters on a word boundary.
pub fn truncate_snippet(text: &str, max_chars: usize) -> String {
    let text = collapse_whitespace(text);
    if text.chars().count() <= max_chars {
        return text;
    }
    let cut: String = text.chars().take(max_chars).collect();
    let cut = match cut.rfind(' ') {
        Some(idx) if idx > max_chars / 2 => &cut[..idx],
        _ => cut.as_str(),
    };
    format!("{}...", cut.trim_end())
}

/// Join author names the way every record stores them.
pub fn join_authors<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|n| collapse_whitespace(n.as_ref()))
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
