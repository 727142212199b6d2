use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const DEFAULT_WELCOME_MESSAGE: &str = "👋 欢迎使用我的机器人！";
pub const DEFAULT_REPLY: &str = "我收到了你的消息！发送 \"按钮\" 查看按钮功能。";
const DEFAULT_GREETING_REPLY: &str = "你好呀！很高兴见到你！😊";

/// The whole reply configuration an operator edits in the admin panel.
///
/// Serialized with camelCase field names; this is the document stored by the
/// file and remote backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
    #[serde(default = "default_reply")]
    pub default_reply: String,
    #[serde(default = "default_keywords")]
    pub keywords: KeywordMap,
    #[serde(default = "default_buttons")]
    pub buttons: Vec<LinkButton>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkButton {
    pub text: String,
    pub url: String,
}

impl LinkButton {
    pub fn new(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: url.into(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            welcome_message: default_welcome_message(),
            default_reply: default_reply(),
            keywords: default_keywords(),
            buttons: default_buttons(),
        }
    }
}

impl BotConfig {
    /// Fills blank welcome/default reply and an empty button list from the
    /// compiled-in default. Keywords are left alone: an empty map is valid.
    pub fn with_fallbacks(mut self) -> Self {
        if self.welcome_message.trim().is_empty() {
            self.welcome_message = default_welcome_message();
        }
        if self.default_reply.trim().is_empty() {
            self.default_reply = default_reply();
        }
        if self.buttons.is_empty() {
            self.buttons = default_buttons();
        }
        self
    }
}

fn default_welcome_message() -> String {
    DEFAULT_WELCOME_MESSAGE.to_string()
}

fn default_reply() -> String {
    DEFAULT_REPLY.to_string()
}

fn default_keywords() -> KeywordMap {
    KeywordMap::from_iter([
        ("你好", DEFAULT_GREETING_REPLY),
        ("hello", DEFAULT_GREETING_REPLY),
    ])
}

fn default_buttons() -> Vec<LinkButton> {
    vec![
        LinkButton::new("GitHub", "https://github.com"),
        LinkButton::new("Google", "https://google.com"),
    ]
}

/// Keyword to reply mapping that keeps insertion order.
///
/// Matching is first-match-wins over this order, so it has to survive JSON
/// round trips. A repeated key keeps its first position and takes the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordMap {
    entries: Vec<(String, String)>,
}

impl KeywordMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KeywordMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = KeywordMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Serialize for KeywordMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for KeywordMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(KeywordMapVisitor)
    }
}

struct KeywordMapVisitor;

impl<'de> Visitor<'de> for KeywordMapVisitor {
    type Value = KeywordMap;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object of keyword to reply strings")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut out = KeywordMap::new();
        while let Some((k, v)) = access.next_entry::<String, String>()? {
            out.insert(k, v);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_keep_document_order() {
        let raw = r#"{"welcomeMessage":"hi","defaultReply":"?","keywords":{"zeta":"1","alpha":"2","mid":"3"},"buttons":[{"text":"A","url":"https://a.example"}]}"#;
        let cfg: BotConfig = serde_json::from_str(raw).unwrap();
        let keys: Vec<&str> = cfg.keywords.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);

        let back = serde_json::to_string(&cfg).unwrap();
        assert!(back.find("zeta").unwrap() < back.find("alpha").unwrap());
        assert!(back.find("alpha").unwrap() < back.find("mid").unwrap());
    }

    #[test]
    fn duplicate_key_keeps_position_takes_last_value() {
        let map = KeywordMap::from_iter([("a", "1"), ("b", "2"), ("a", "3")]);
        let pairs: Vec<(&str, &str)> = map.iter().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: BotConfig = serde_json::from_str(r#"{"welcomeMessage":"hey"}"#).unwrap();
        assert_eq!(cfg.welcome_message, "hey");
        assert_eq!(cfg.default_reply, DEFAULT_REPLY);
        assert_eq!(cfg.keywords.get("hello"), Some("你好呀！很高兴见到你！😊"));
        assert_eq!(cfg.buttons.len(), 2);
    }

    #[test]
    fn with_fallbacks_fills_blanks_only() {
        let cfg = BotConfig {
            welcome_message: "  ".to_string(),
            default_reply: "custom".to_string(),
            keywords: KeywordMap::new(),
            buttons: Vec::new(),
        }
        .with_fallbacks();
        assert_eq!(cfg.welcome_message, DEFAULT_WELCOME_MESSAGE);
        assert_eq!(cfg.default_reply, "custom");
        assert!(cfg.keywords.is_empty());
        assert_eq!(cfg.buttons, BotConfig::default().buttons);
    }

    #[test]
    fn field_names_are_camel_case() {
        let value = serde_json::to_value(BotConfig::default()).unwrap();
        let obj = value.as_object().unwrap();
        for key in ["welcomeMessage", "defaultReply", "keywords", "buttons"] {
            assert!(obj.contains_key(key), "missing {key}");
        }
    }
}
