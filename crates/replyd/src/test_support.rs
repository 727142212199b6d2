use std::sync::Mutex;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use reply_core::media::MediaKind;
use reply_core::types::MenuButton;

use crate::telegram_gateway::ReplySink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(i64, String),
    Media(i64, MediaKind, String),
    Menu(i64, String, Vec<Vec<MenuButton>>),
    Answer(String),
    Edit(i64, i32, String),
    Webhook(String),
}

/// In-memory sink that records every call.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Sent>>,
    fail_media: bool,
    fail_webhook: bool,
    /// Delay before recording a text, to expose reordering.
    text_delay: Option<Duration>,
}

impl RecordingSink {
    pub fn failing_media() -> Self {
        Self {
            fail_media: true,
            ..Self::default()
        }
    }

    pub fn failing_webhook() -> Self {
        Self {
            fail_webhook: true,
            ..Self::default()
        }
    }

    pub fn slow_text(delay: Duration) -> Self {
        Self {
            text_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn push(&self, item: Sent) {
        self.sent.lock().unwrap().push(item);
    }

    /// Polls until `count` items were recorded or two seconds passed.
    pub async fn wait_for(&self, count: usize) -> Vec<Sent> {
        for _ in 0..200 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn send_text(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        if let Some(delay) = self.text_delay {
            tokio::time::sleep(delay).await;
        }
        self.push(Sent::Text(chat_id, text.to_string()));
        Ok(())
    }

    async fn send_media(&self, chat_id: i64, kind: MediaKind, payload: &str) -> anyhow::Result<()> {
        if self.fail_media {
            return Err(anyhow!("Bad Request: wrong file identifier"));
        }
        self.push(Sent::Media(chat_id, kind, payload.to_string()));
        Ok(())
    }

    async fn send_menu(&self, chat_id: i64, prompt: &str, rows: &[Vec<MenuButton>]) -> anyhow::Result<()> {
        self.push(Sent::Menu(chat_id, prompt.to_string(), rows.to_vec()));
        Ok(())
    }

    async fn answer_callback(&self, query_id: &str) -> anyhow::Result<()> {
        self.push(Sent::Answer(query_id.to_string()));
        Ok(())
    }

    async fn edit_text(&self, chat_id: i64, message_id: i32, text: &str) -> anyhow::Result<()> {
        self.push(Sent::Edit(chat_id, message_id, text.to_string()));
        Ok(())
    }

    async fn set_webhook(&self, url: &str) -> anyhow::Result<()> {
        if self.fail_webhook {
            return Err(anyhow!("Unauthorized"));
        }
        self.push(Sent::Webhook(url.to_string()));
        Ok(())
    }
}
