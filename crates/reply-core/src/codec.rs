//! Delimiter encodings used by the admin form and the env seed variables.
//!
//! `key=value;key=value` for keywords and `text|url;text|url` for buttons.
//! Only the first `=` / `|` of an entry splits it, so values may contain the
//! separator. A value containing `;` cannot be expressed.

use crate::model::{KeywordMap, LinkButton};

const ENTRY_SEPARATOR: char = ';';
const KEYWORD_SEPARATOR: char = '=';
const BUTTON_SEPARATOR: char = '|';

pub fn parse_keywords(raw: &str) -> KeywordMap {
    split_entries(raw, KEYWORD_SEPARATOR).collect()
}

pub fn format_keywords(keywords: &KeywordMap) -> String {
    keywords
        .iter()
        .map(|(k, v)| format!("{k}{KEYWORD_SEPARATOR}{v}"))
        .collect::<Vec<_>>()
        .join(&ENTRY_SEPARATOR.to_string())
}

pub fn parse_buttons(raw: &str) -> Vec<LinkButton> {
    split_entries(raw, BUTTON_SEPARATOR)
        .map(|(text, url)| LinkButton::new(text, url))
        .collect()
}

pub fn format_buttons(buttons: &[LinkButton]) -> String {
    buttons
        .iter()
        .map(|b| format!("{}{BUTTON_SEPARATOR}{}", b.text, b.url))
        .collect::<Vec<_>>()
        .join(&ENTRY_SEPARATOR.to_string())
}

// 空条目、缺少分隔符、键或值为空的条目一律跳过。
fn split_entries(raw: &str, separator: char) -> impl Iterator<Item = (&str, &str)> {
    raw.split(ENTRY_SEPARATOR).filter_map(move |entry| {
        let (left, right) = entry.split_once(separator)?;
        let (left, right) = (left.trim(), right.trim());
        if left.is_empty() || right.is_empty() {
            return None;
        }
        Some((left, right))
    })
}
