use std::fmt;

use crate::config::LimitsConfig;
use crate::model::{KeywordMap, LinkButton};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitViolation {
    pub field: String,
    pub max_chars: usize,
    pub actual_chars: usize,
}

impl fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} 超出长度限制（{}/{} 字符）",
            self.field, self.actual_chars, self.max_chars
        )
    }
}

fn check(field: &str, value: &str, max_chars: usize, out: &mut Vec<LimitViolation>) {
    let actual_chars = value.chars().count();
    if actual_chars > max_chars {
        out.push(LimitViolation {
            field: field.to_string(),
            max_chars,
            actual_chars,
        });
    }
}

/// Whole-field caps of the admin form. These are the ones `enforce` can reject on.
pub fn check_form_fields(
    welcome_message: &str,
    default_reply: &str,
    keywords_raw: &str,
    buttons_raw: &str,
    limits: &LimitsConfig,
) -> Vec<LimitViolation> {
    let mut out = Vec::new();
    check("welcomeMessage", welcome_message, limits.welcome_max_chars, &mut out);
    check("defaultReply", default_reply, limits.default_reply_max_chars, &mut out);
    check("keywords", keywords_raw, limits.keywords_max_chars, &mut out);
    check("buttons", buttons_raw, limits.buttons_max_chars, &mut out);
    out
}

/// Per-entry caps for keywords; only reported, never applied.
pub fn check_keywords(keywords: &KeywordMap, limits: &LimitsConfig) -> Vec<LimitViolation> {
    let mut out = Vec::new();
    for (key, value) in keywords.iter() {
        check(&format!("keyword {key:?}"), key, limits.keyword_key_max_chars, &mut out);
        check(
            &format!("reply of {key:?}"),
            value,
            limits.keyword_value_max_chars,
            &mut out,
        );
    }
    out
}

pub fn clamp_buttons(buttons: Vec<LinkButton>, limits: &LimitsConfig) -> Vec<LinkButton> {
    buttons
        .into_iter()
        .map(|b| LinkButton {
            text: truncate_chars(&b.text, limits.button_text_max_chars),
            url: truncate_chars(&b.url, limits.button_url_max_chars),
        })
        .collect()
}

pub fn truncate_chars(raw: &str, max_chars: usize) -> String {
    match raw.char_indices().nth(max_chars) {
        Some((idx, _)) => raw[..idx].to_string(),
        None => raw.to_string(),
    }
}
