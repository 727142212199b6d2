use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reply_core::config::TelegramConfig;
use reply_core::error::ReplyError;
use reply_core::media::MediaKind;
use reply_core::model::BotConfig;
use reply_core::resolver::ReplyResolver;
use reply_core::types::{MenuButton, OutboundAction};
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, Update, UpdateKind};
use tracing::{debug, info, warn};
use url::Url;

use crate::config_store::{ConfigSnapshot, ConfigStore};

/// Outbound side of the Telegram Bot API as the bot uses it.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> anyhow::Result<()>;
    async fn send_media(&self, chat_id: i64, kind: MediaKind, payload: &str) -> anyhow::Result<()>;
    async fn send_menu(&self, chat_id: i64, prompt: &str, rows: &[Vec<MenuButton>]) -> anyhow::Result<()>;
    async fn answer_callback(&self, query_id: &str) -> anyhow::Result<()>;
    async fn edit_text(&self, chat_id: i64, message_id: i32, text: &str) -> anyhow::Result<()>;
    async fn set_webhook(&self, url: &str) -> anyhow::Result<()>;
}

pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }
}

// http(s) 链接按 URL 发送，其余当作 Telegram file_id。
fn input_file(payload: &str) -> InputFile {
    match Url::parse(payload) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => InputFile::url(url),
        _ => InputFile::file_id(payload.to_string()),
    }
}

fn keyboard_markup(rows: &[Vec<MenuButton>]) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .filter_map(|button| match button {
                    MenuButton::Link { text, url } => match Url::parse(url) {
                        Ok(url) => Some(InlineKeyboardButton::url(text.clone(), url)),
                        Err(err) => {
                            warn!("skip menu button with invalid url: text={} err={}", text, err);
                            None
                        }
                    },
                    MenuButton::Callback { text, data } => {
                        Some(InlineKeyboardButton::callback(text.clone(), data.clone()))
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect();
    InlineKeyboardMarkup::new(rows)
}

#[async_trait]
impl ReplySink for TelegramSink {
    async fn send_text(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        self.bot
            .send_message(ChatId(chat_id), text.to_string())
            .await
            .context("send text message failed")?;
        Ok(())
    }

    async fn send_media(&self, chat_id: i64, kind: MediaKind, payload: &str) -> anyhow::Result<()> {
        let chat = ChatId(chat_id);
        let file = input_file(payload);
        match kind {
            MediaKind::Photo => {
                self.bot.send_photo(chat, file).await.context("send photo failed")?;
            }
            MediaKind::Video => {
                self.bot.send_video(chat, file).await.context("send video failed")?;
            }
            MediaKind::Document => {
                self.bot
                    .send_document(chat, file)
                    .await
                    .context("send document failed")?;
            }
        }
        Ok(())
    }

    async fn send_menu(&self, chat_id: i64, prompt: &str, rows: &[Vec<MenuButton>]) -> anyhow::Result<()> {
        self.bot
            .send_message(ChatId(chat_id), prompt.to_string())
            .reply_markup(keyboard_markup(rows))
            .await
            .context("send menu failed")?;
        Ok(())
    }

    async fn answer_callback(&self, query_id: &str) -> anyhow::Result<()> {
        self.bot
            .answer_callback_query(query_id.to_string())
            .await
            .context("answer callback query failed")?;
        Ok(())
    }

    async fn edit_text(&self, chat_id: i64, message_id: i32, text: &str) -> anyhow::Result<()> {
        self.bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), text.to_string())
            .await
            .context("edit message text failed")?;
        Ok(())
    }

    async fn set_webhook(&self, url: &str) -> anyhow::Result<()> {
        let url = Url::parse(url).with_context(|| format!("invalid webhook url: {url}"))?;
        self.bot.set_webhook(url).await.context("setWebhook failed")?;
        Ok(())
    }
}

/// The parts of a Telegram update the bot reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text {
        chat_id: i64,
        text: String,
    },
    Callback {
        query_id: String,
        /// Lane key: the chat of the message, else the user.
        lane_id: i64,
        message: Option<(i64, i32)>,
        data: Option<String>,
    },
}

impl Inbound {
    pub fn lane_id(&self) -> i64 {
        match self {
            Inbound::Text { chat_id, .. } => *chat_id,
            Inbound::Callback { lane_id, .. } => *lane_id,
        }
    }
}

pub fn parse_update(body: &[u8]) -> Result<Update, ReplyError> {
    serde_json::from_slice::<Update>(body).map_err(|err| ReplyError::MalformedInboundUpdate(err.to_string()))
}

/// `None` for updates without text or callback data (stickers, edits, joins, ...).
pub fn classify_update(update: &Update) -> Option<Inbound> {
    match &update.kind {
        UpdateKind::Message(msg) => msg.text().map(|text| Inbound::Text {
            chat_id: msg.chat.id.0,
            text: text.to_string(),
        }),
        UpdateKind::CallbackQuery(query) => {
            let message = query.message.as_ref().map(|m| (m.chat.id.0, m.id.0));
            Some(Inbound::Callback {
                query_id: query.id.clone(),
                lane_id: message.map(|(chat, _)| chat).unwrap_or(query.from.id.0 as i64),
                message,
                data: query.data.clone(),
            })
        }
        _ => None,
    }
}

/// Resolves inbound chat events against the current config and delivers the reply.
#[derive(Clone)]
pub struct ReplyGateway {
    pub sink: Arc<dyn ReplySink>,
    pub store: Arc<dyn ConfigStore>,
    pub snapshot: Arc<ConfigSnapshot>,
    resolver: Arc<ReplyResolver>,
    save_lock: Arc<tokio::sync::Mutex<()>>,
    reload_per_message: bool,
    menu_callback_data: String,
    menu_return_text: String,
    media_failure_text: String,
}

impl ReplyGateway {
    pub fn new(
        telegram: &TelegramConfig,
        sink: Arc<dyn ReplySink>,
        store: Arc<dyn ConfigStore>,
        snapshot: Arc<ConfigSnapshot>,
        reload_per_message: bool,
    ) -> Self {
        // env 后端重新读取只会拿回启动时的配置，后台保存的内容只在快照里。
        let reload_per_message = reload_per_message && store.is_persistent();
        Self {
            sink,
            store,
            snapshot,
            resolver: Arc::new(ReplyResolver::from_config(telegram)),
            save_lock: Arc::new(tokio::sync::Mutex::new(())),
            reload_per_message,
            menu_callback_data: telegram.menu_callback_data.clone(),
            menu_return_text: telegram.menu_return_text.clone(),
            media_failure_text: telegram.media_failure_text.clone(),
        }
    }

    async fn current_config(&self) -> Arc<BotConfig> {
        if self.reload_per_message {
            Arc::new(self.store.load().await)
        } else {
            self.snapshot.current()
        }
    }

    /// Saves through the store and, only on success, swaps the snapshot.
    /// Saves are serialized so the snapshot always matches the last stored config.
    pub async fn save_config(&self, config: BotConfig) -> Result<BotConfig, ReplyError> {
        let _guard = self.save_lock.lock().await;
        let saved = self.store.save(config).await?;
        self.snapshot.replace(saved.clone());
        Ok(saved)
    }

    /// Re-reads the store into the snapshot. Missing documents and read errors keep the cache.
    pub async fn refresh_snapshot(&self) -> Result<(), ReplyError> {
        let _guard = self.save_lock.lock().await;
        if let Some(fresh) = self.store.fetch().await? {
            self.snapshot.replace(fresh.with_fallbacks());
        }
        Ok(())
    }

    pub async fn handle(&self, inbound: Inbound) -> anyhow::Result<()> {
        match inbound {
            Inbound::Text { chat_id, text } => self.handle_text(chat_id, &text).await,
            Inbound::Callback {
                query_id,
                message,
                data,
                ..
            } => self.handle_callback(&query_id, message, data.as_deref()).await,
        }
    }

    async fn handle_text(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        let config = self.current_config().await;
        if let Some(command) = command_name(text) {
            if command != "start" {
                debug!("handle_text: ignore command chat_id={} command={}", chat_id, command);
                return Ok(());
            }
            info!("handle_text: welcome chat_id={}", chat_id);
            return self.deliver(chat_id, &self.resolver.welcome(&config)).await;
        }

        let actions = self.resolver.resolve(text, &config);
        info!(
            "handle_text: chat_id={} text_chars={} actions={}",
            chat_id,
            text.chars().count(),
            actions.len()
        );
        self.deliver(chat_id, &actions).await
    }

    async fn handle_callback(
        &self,
        query_id: &str,
        message: Option<(i64, i32)>,
        data: Option<&str>,
    ) -> anyhow::Result<()> {
        if let Err(err) = self.sink.answer_callback(query_id).await {
            warn!("answer callback failed: query_id={} err={:#}", query_id, err);
        }
        if data != Some(self.menu_callback_data.as_str()) {
            debug!("handle_callback: ignore data={:?}", data);
            return Ok(());
        }
        let Some((chat_id, message_id)) = message else {
            return Ok(());
        };
        self.sink
            .edit_text(chat_id, message_id, &self.menu_return_text)
            .await
    }

    /// Sends actions in order. A failed media item becomes a short apology text.
    pub async fn deliver(&self, chat_id: i64, actions: &[OutboundAction]) -> anyhow::Result<()> {
        for action in actions {
            match action {
                OutboundAction::Text(text) => self.sink.send_text(chat_id, text).await?,
                OutboundAction::Media { kind, payload } => {
                    if let Err(err) = self.sink.send_media(chat_id, *kind, payload).await {
                        let err = ReplyError::MediaSendFailed(format!("{}: {err:#}", kind.tag()));
                        warn!("deliver: chat_id={} err={}", chat_id, err);
                        self.sink.send_text(chat_id, &self.media_failure_text).await?;
                    }
                }
                OutboundAction::ShowButtons { prompt, rows } => {
                    self.sink.send_menu(chat_id, prompt, rows).await?
                }
            }
        }
        Ok(())
    }
}

/// `/start@SomeBot payload` -> `start`.
fn command_name(text: &str) -> Option<&str> {
    let first = text.trim_start().strip_prefix('/')?.split_whitespace().next()?;
    Some(first.split('@').next().unwrap_or(first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::{EnvStore, FileStore};
    use crate::test_support::{RecordingSink, Sent};
    use reply_core::model::KeywordMap;

    fn gateway(sink: Arc<RecordingSink>, config: BotConfig) -> ReplyGateway {
        let store: Arc<dyn ConfigStore> = Arc::new(EnvStore::new(config.clone()));
        ReplyGateway::new(
            &TelegramConfig::default(),
            sink,
            store,
            Arc::new(ConfigSnapshot::new(config)),
            false,
        )
    }

    fn text_update(chat_id: i64, text: &str) -> Vec<u8> {
        serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 5,
                "date": 1_700_000_000,
                "chat": {"id": chat_id, "type": "private", "first_name": "Li"},
                "from": {"id": chat_id, "is_bot": false, "first_name": "Li"},
                "text": text
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn classify_text_message() {
        let update = parse_update(&text_update(42, "你好")).unwrap();
        assert_eq!(
            classify_update(&update),
            Some(Inbound::Text {
                chat_id: 42,
                text: "你好".to_string()
            })
        );
    }

    #[test]
    fn classify_callback_query() {
        let body = serde_json::json!({
            "update_id": 11,
            "callback_query": {
                "id": "cb-1",
                "from": {"id": 7, "is_bot": false, "first_name": "Li"},
                "chat_instance": "ci",
                "data": "menu",
                "message": {
                    "message_id": 99,
                    "date": 1_700_000_000,
                    "chat": {"id": 42, "type": "private", "first_name": "Li"},
                    "text": "点击下面的按钮："
                }
            }
        })
        .to_string();
        let update = parse_update(body.as_bytes()).unwrap();
        assert_eq!(
            classify_update(&update),
            Some(Inbound::Callback {
                query_id: "cb-1".to_string(),
                lane_id: 42,
                message: Some((42, 99)),
                data: Some("menu".to_string()),
            })
        );
    }

    #[test]
    fn garbage_body_is_malformed_update() {
        assert!(matches!(
            parse_update(b"not json"),
            Err(ReplyError::MalformedInboundUpdate(_))
        ));
    }

    #[test]
    fn command_name_strips_bot_suffix() {
        assert_eq!(command_name("/start@demo_bot hi"), Some("start"));
        assert_eq!(command_name("  /help"), Some("help"));
        assert_eq!(command_name("hello /start"), None);
        assert_eq!(command_name("/"), None);
    }

    #[tokio::test]
    async fn start_sends_welcome() {
        let sink = Arc::new(RecordingSink::default());
        let gw = gateway(sink.clone(), BotConfig::default());
        gw.handle(Inbound::Text {
            chat_id: 1,
            text: "/start".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(sink.sent(), vec![Sent::Text(1, BotConfig::default().welcome_message)]);
    }

    #[tokio::test]
    async fn other_commands_are_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let gw = gateway(sink.clone(), BotConfig::default());
        gw.handle(Inbound::Text {
            chat_id: 1,
            text: "/help".to_string(),
        })
        .await
        .unwrap();
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn keyword_reply_with_media_is_delivered_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let cfg = BotConfig {
            keywords: KeywordMap::from_iter([("价格", "请看[图片:https://x.example/p.png]谢谢")]),
            ..BotConfig::default()
        };
        let gw = gateway(sink.clone(), cfg);
        gw.handle(Inbound::Text {
            chat_id: 3,
            text: "价格多少".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(
            sink.sent(),
            vec![
                Sent::Text(3, "请看".to_string()),
                Sent::Media(3, MediaKind::Photo, "https://x.example/p.png".to_string()),
                Sent::Text(3, "谢谢".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn failed_media_is_replaced_by_apology() {
        let sink = Arc::new(RecordingSink::failing_media());
        let cfg = BotConfig {
            keywords: KeywordMap::from_iter([("video", "[视频:bad-id]after")]),
            ..BotConfig::default()
        };
        let gw = gateway(sink.clone(), cfg);
        gw.handle(Inbound::Text {
            chat_id: 3,
            text: "video".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(
            sink.sent(),
            vec![
                Sent::Text(3, TelegramConfig::default().media_failure_text),
                Sent::Text(3, "after".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn buttons_trigger_sends_menu() {
        let sink = Arc::new(RecordingSink::default());
        let gw = gateway(sink.clone(), BotConfig::default());
        gw.handle(Inbound::Text {
            chat_id: 9,
            text: "按钮".to_string(),
        })
        .await
        .unwrap();
        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        let Sent::Menu(9, prompt, rows) = &sent[0] else {
            panic!("expected menu, got {sent:?}");
        };
        assert_eq!(prompt, "点击下面的按钮：");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].len(), 1);
    }

    #[tokio::test]
    async fn menu_callback_answers_and_edits() {
        let sink = Arc::new(RecordingSink::default());
        let gw = gateway(sink.clone(), BotConfig::default());
        gw.handle(Inbound::Callback {
            query_id: "q1".to_string(),
            lane_id: 5,
            message: Some((5, 77)),
            data: Some("menu".to_string()),
        })
        .await
        .unwrap();
        assert_eq!(
            sink.sent(),
            vec![
                Sent::Answer("q1".to_string()),
                Sent::Edit(5, 77, "回到主菜单了！".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_callback_is_only_answered() {
        let sink = Arc::new(RecordingSink::default());
        let gw = gateway(sink.clone(), BotConfig::default());
        gw.handle(Inbound::Callback {
            query_id: "q2".to_string(),
            lane_id: 5,
            message: Some((5, 77)),
            data: Some("other".to_string()),
        })
        .await
        .unwrap();
        assert_eq!(sink.sent(), vec![Sent::Answer("q2".to_string())]);
    }

    fn ping_pong() -> BotConfig {
        BotConfig {
            keywords: KeywordMap::from_iter([("ping", "pong")]),
            ..BotConfig::default()
        }
    }

    #[tokio::test]
    async fn env_store_save_is_answered_even_with_per_message_reload() {
        let sink = Arc::new(RecordingSink::default());
        let store: Arc<dyn ConfigStore> = Arc::new(EnvStore::new(BotConfig::default()));
        let gw = ReplyGateway::new(
            &TelegramConfig::default(),
            sink.clone(),
            store,
            Arc::new(ConfigSnapshot::new(BotConfig::default())),
            true,
        );

        gw.save_config(ping_pong()).await.unwrap();
        gw.handle(Inbound::Text {
            chat_id: 1,
            text: "ping".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(sink.sent(), vec![Sent::Text(1, "pong".to_string())]);
    }

    #[tokio::test]
    async fn file_store_is_reread_per_message_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store: Arc<dyn ConfigStore> = Arc::new(FileStore::new(&path));
        let sink = Arc::new(RecordingSink::default());
        let gw = ReplyGateway::new(
            &TelegramConfig::default(),
            sink.clone(),
            store.clone(),
            Arc::new(ConfigSnapshot::new(BotConfig::default())),
            true,
        );

        // 另一个进程写入的配置，本进程快照不知道。
        FileStore::new(&path).save(ping_pong()).await.unwrap();
        gw.handle(Inbound::Text {
            chat_id: 2,
            text: "ping".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(sink.sent(), vec![Sent::Text(2, "pong".to_string())]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_leave_snapshot_matching_store() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ConfigStore> = Arc::new(FileStore::new(dir.path().join("config.json")));
        let sink = Arc::new(RecordingSink::default());
        let gw = ReplyGateway::new(
            &TelegramConfig::default(),
            sink,
            store.clone(),
            Arc::new(ConfigSnapshot::new(BotConfig::default())),
            false,
        );

        for round in 0..30 {
            let tasks: Vec<_> = ["a", "b", "c"]
                .into_iter()
                .map(|tag| {
                    let gw = gw.clone();
                    let mut cfg = BotConfig::default();
                    cfg.welcome_message = format!("{tag}-{round}");
                    tokio::spawn(async move { gw.save_config(cfg).await })
                })
                .collect();
            for task in tasks {
                assert!(task.await.unwrap().is_ok());
            }
            let on_disk = store.fetch().await.unwrap().unwrap();
            assert_eq!(*gw.snapshot.current(), on_disk);
        }
    }

    #[tokio::test]
    async fn failed_save_keeps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();
        let store: Arc<dyn ConfigStore> = Arc::new(FileStore::new(blocker.join("config.json")));
        let gw = ReplyGateway::new(
            &TelegramConfig::default(),
            Arc::new(RecordingSink::default()),
            store,
            Arc::new(ConfigSnapshot::new(BotConfig::default())),
            false,
        );

        assert!(matches!(
            gw.save_config(ping_pong()).await,
            Err(ReplyError::ConfigSaveFailed(_))
        ));
        assert_eq!(*gw.snapshot.current(), BotConfig::default());
    }

    #[tokio::test]
    async fn refresh_snapshot_keeps_cache_on_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();
        let store: Arc<dyn ConfigStore> = Arc::new(FileStore::new(blocker.join("config.json")));
        let gw = ReplyGateway::new(
            &TelegramConfig::default(),
            Arc::new(RecordingSink::default()),
            store,
            Arc::new(ConfigSnapshot::new(ping_pong())),
            false,
        );

        assert!(matches!(
            gw.refresh_snapshot().await,
            Err(ReplyError::ConfigUnavailable(_))
        ));
        assert_eq!(*gw.snapshot.current(), ping_pong());
    }

    #[test]
    fn keyboard_skips_invalid_urls() {
        let rows = vec![vec![
            MenuButton::Link {
                text: "ok".to_string(),
                url: "https://ok.example".to_string(),
            },
            MenuButton::Link {
                text: "bad".to_string(),
                url: "not a url".to_string(),
            },
        ]];
        let markup = keyboard_markup(&rows);
        assert_eq!(markup.inline_keyboard.len(), 1);
        assert_eq!(markup.inline_keyboard[0].len(), 1);
    }
}
