use serde::{Deserialize, Serialize};

use crate::media::MediaKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub version: String,
    pub uptime_seconds: u64,
    /// env / file / remote
    pub store_backend: String,
    /// 保存是否会写入后端；env 后端只在当前进程内生效
    pub store_persistent: bool,
    pub keyword_count: usize,
    pub button_count: usize,
    /// 当前有排队消息的会话数量
    pub active_chat_lanes: usize,
}

/// One step of a reply, delivered to the chat in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    Text(String),
    Media { kind: MediaKind, payload: String },
    ShowButtons {
        prompt: String,
        rows: Vec<Vec<MenuButton>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuButton {
    Link { text: String, url: String },
    Callback { text: String, data: String },
}
