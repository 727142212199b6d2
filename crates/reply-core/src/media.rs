//! Bracket media tags embedded in reply text.
//!
//! A reply such as `看这里[图片:https://x/y.png]谢谢` becomes an ordered list of
//! segments. Anything that is not a well-formed tag stays literal text.
//! A reply that is nothing but `image:<url>` (or `video:`/`file:`) is a
//! single media item.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Document,
}

impl MediaKind {
    pub fn tag(self) -> &'static str {
        match self {
            MediaKind::Photo => "图片",
            MediaKind::Video => "视频",
            MediaKind::Document => "文件",
        }
    }

    fn from_tag(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "图片" | "image" => Some(MediaKind::Photo),
            "视频" | "video" => Some(MediaKind::Video),
            "文件" | "file" => Some(MediaKind::Document),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Media { kind: MediaKind, payload: String },
}

fn tag_regex() -> &'static Regex {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    TAG_RE.get_or_init(|| {
        Regex::new(r"\[(图片|视频|文件|(?i:image|video|file))\s*[:：]([^\[\]]*)\]")
            .unwrap_or_else(|err| panic!("media tag regex must compile: {err}"))
    })
}

// `image:https://...` 整条回复只是一个媒体链接，且必须是 http(s) 地址。
fn whole_reply_media(raw: &str) -> Option<Segment> {
    let (prefix, rest) = raw.trim().split_once(':')?;
    let kind = match prefix.to_ascii_lowercase().as_str() {
        "image" => MediaKind::Photo,
        "video" => MediaKind::Video,
        "file" => MediaKind::Document,
        _ => return None,
    };
    let payload = rest.trim();
    if payload.chars().any(char::is_whitespace) {
        return None;
    }
    let url = Url::parse(payload).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    Some(Segment::Media {
        kind,
        payload: payload.to_string(),
    })
}

pub fn parse_segments(raw: &str) -> Vec<Segment> {
    if let Some(media) = whole_reply_media(raw) {
        return vec![media];
    }
    let mut out = Vec::new();
    let mut cursor = 0;
    for caps in tag_regex().captures_iter(raw) {
        let (Some(whole), Some(kind), Some(payload)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        let payload = payload.as_str().trim();
        let Some(kind) = MediaKind::from_tag(kind.as_str()) else {
            continue;
        };
        // 空载荷的标签按普通文本保留。
        if payload.is_empty() {
            continue;
        }
        if whole.start() > cursor {
            out.push(Segment::Text(raw[cursor..whole.start()].to_string()));
        }
        out.push(Segment::Media {
            kind,
            payload: payload.to_string(),
        });
        cursor = whole.end();
    }
    if cursor < raw.len() {
        out.push(Segment::Text(raw[cursor..].to_string()));
    }
    out
}

/// Inverse of [`parse_segments`], always writing the canonical tag names.
pub fn render_segments(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Media { kind, payload } => {
                out.push('[');
                out.push_str(kind.tag());
                out.push(':');
                out.push_str(payload);
                out.push(']');
            }
        }
    }
    out
}
