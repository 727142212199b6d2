use crate::config::TelegramConfig;
use crate::media::{parse_segments, Segment};
use crate::model::{BotConfig, DEFAULT_REPLY};
use crate::types::{MenuButton, OutboundAction};

pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

/// Turns inbound chat text into the ordered actions of the reply.
#[derive(Debug, Clone)]
pub struct ReplyResolver {
    buttons_triggers: Vec<String>,
    menu_prompt: String,
    menu_back_text: String,
    menu_callback_data: String,
}

impl ReplyResolver {
    pub fn new(
        buttons_triggers: &[String],
        menu_prompt: impl Into<String>,
        menu_back_text: impl Into<String>,
        menu_callback_data: impl Into<String>,
    ) -> Self {
        Self {
            buttons_triggers: buttons_triggers
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            menu_prompt: menu_prompt.into(),
            menu_back_text: menu_back_text.into(),
            menu_callback_data: menu_callback_data.into(),
        }
    }

    pub fn from_config(cfg: &TelegramConfig) -> Self {
        Self::new(
            &cfg.buttons_triggers,
            cfg.menu_prompt.clone(),
            cfg.menu_back_text.clone(),
            cfg.menu_callback_data.clone(),
        )
    }

    pub fn is_buttons_trigger(&self, text: &str) -> bool {
        let normalized = text.trim().to_lowercase();
        self.buttons_triggers.iter().any(|t| *t == normalized)
    }

    /// Never empty: falls back to the default reply, then to the built-in one.
    pub fn resolve(&self, text: &str, config: &BotConfig) -> Vec<OutboundAction> {
        if self.is_buttons_trigger(text) {
            return vec![self.menu(config)];
        }
        let reply = match_keyword(text, config).unwrap_or(config.default_reply.as_str());
        self.render_or_default(reply, config)
    }

    pub fn welcome(&self, config: &BotConfig) -> Vec<OutboundAction> {
        self.render_or_default(&config.welcome_message, config)
    }

    pub fn menu(&self, config: &BotConfig) -> OutboundAction {
        let back = MenuButton::Callback {
            text: self.menu_back_text.clone(),
            data: self.menu_callback_data.clone(),
        };
        let mut rows: Vec<Vec<MenuButton>> = config
            .buttons
            .chunks(2)
            .map(|pair| {
                pair.iter()
                    .map(|b| MenuButton::Link {
                        text: b.text.clone(),
                        url: b.url.clone(),
                    })
                    .collect()
            })
            .collect();
        // 奇数个按钮时返回按钮补在最后一行。
        match rows.last_mut().filter(|last| last.len() == 1) {
            Some(last) => last.push(back),
            None => rows.push(vec![back]),
        }
        OutboundAction::ShowButtons {
            prompt: self.menu_prompt.clone(),
            rows,
        }
    }

    fn render_or_default(&self, reply: &str, config: &BotConfig) -> Vec<OutboundAction> {
        let actions = render_reply(reply);
        if !actions.is_empty() {
            return actions;
        }
        let actions = render_reply(&config.default_reply);
        if !actions.is_empty() {
            return actions;
        }
        vec![OutboundAction::Text(DEFAULT_REPLY.to_string())]
    }
}

/// First keyword, in stored order, contained in `text` ignoring case.
pub fn match_keyword<'a>(text: &str, config: &'a BotConfig) -> Option<&'a str> {
    let haystack = text.to_lowercase();
    config
        .keywords
        .iter()
        .filter(|(key, _)| !key.trim().is_empty())
        .find(|(key, _)| haystack.contains(&key.to_lowercase()))
        .map(|(_, reply)| reply)
}

pub fn render_reply(raw: &str) -> Vec<OutboundAction> {
    let mut out = Vec::new();
    for segment in parse_segments(raw) {
        match segment {
            Segment::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                out.extend(
                    chunk_text(text, TELEGRAM_MAX_MESSAGE_LEN)
                        .into_iter()
                        .map(OutboundAction::Text),
                );
            }
            Segment::Media { kind, payload } => out.push(OutboundAction::Media { kind, payload }),
        }
    }
    out
}

/// Splits by characters, preferring to break after whitespace or sentence punctuation.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars || max_chars == 0 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let mut end = (start + max_chars).min(chars.len());
        if end < chars.len() {
            let split = (start..end)
                .rev()
                .find(|&i| matches!(chars[i], '\n' | ' ' | '.' | '!' | '?' | '。' | '！' | '？'))
                .map(|i| i + 1);
            if let Some(split) = split {
                end = split;
            }
        }
        chunks.push(chars[start..end].iter().collect::<String>());
        start = end;
    }
    chunks
}
