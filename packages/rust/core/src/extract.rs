//! URL extraction from free-form text.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Characters that end a URL in running text, including full-width
/// punctuation common in CJK messages.
static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhttps?://[^\s<>"'`，。、；：！？（）【】「」]+"#).expect("valid regex")
});

/// Trailing characters that are almost always sentence punctuation.
const TRAILING: &[char] = &['.', ',', ';', ':', '!', '?'];

/// Find every `http`/`https` URL in `text`, in order of appearance.
///
/// Duplicates are kept. An empty result means "no URL found".
pub fn extract_urls(text: &str) -> Vec<String> {
    URL_RE
        .find_iter(text)
        .filter_map(|m| clean(m.as_str()))
        .collect()
}

/// Strip trailing punctuation and unbalanced closing brackets, then validate.
fn clean(candidate: &str) -> Option<String> {
    let mut s = candidate;
    loop {
        let trimmed = s.trim_end_matches(TRAILING);
        let trimmed = strip_unbalanced(trimmed, '(', ')');
        let trimmed = strip_unbalanced(trimmed, '[', ']');
        if trimmed.len() == s.len() {
            break;
        }
        s = trimmed;
    }

    let parsed = Url::parse(s).ok()?;
    parsed.host_str().filter(|h| !h.is_empty())?;
    Some(s.to_string())
}

fn strip_unbalanced(s: &str, open: char, close: char) -> &str {
    if s.ends_with(close) && s.matches(close).count() > s.matches(open).count() {
        &s[..s.len() - close.len_utf8()]
    } else {
        s
    }
}
