use std::path::PathBuf;

use serde::Deserialize;

use crate::codec::{parse_buttons, parse_keywords};
use crate::error::ReplyError;
use crate::model::BotConfig;

pub const DEFAULT_CONFIG_PATH: &str = "configs/config.toml";
pub const DEFAULT_ADMIN_PASSWORD: &str = "default_password";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_server_listen(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Public base URL used by `/set-webhook`; falls back to the request host.
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default = "default_telegram_buttons_triggers")]
    pub buttons_triggers: Vec<String>,
    #[serde(default = "default_telegram_menu_prompt")]
    pub menu_prompt: String,
    #[serde(default = "default_telegram_menu_back_text")]
    pub menu_back_text: String,
    #[serde(default = "default_telegram_menu_callback_data")]
    pub menu_callback_data: String,
    #[serde(default = "default_telegram_menu_return_text")]
    pub menu_return_text: String,
    #[serde(default = "default_telegram_media_failure_text")]
    pub media_failure_text: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            public_url: None,
            buttons_triggers: default_telegram_buttons_triggers(),
            menu_prompt: default_telegram_menu_prompt(),
            menu_back_text: default_telegram_menu_back_text(),
            menu_callback_data: default_telegram_menu_callback_data(),
            menu_return_text: default_telegram_menu_return_text(),
            media_failure_text: default_telegram_media_failure_text(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_password")]
    pub password: String,
    #[serde(default = "default_admin_session_ttl_seconds")]
    pub session_ttl_seconds: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            password: default_admin_password(),
            session_ttl_seconds: default_admin_session_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Env,
    File,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: Option<StoreKind>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub remote_base_url: Option<String>,
    #[serde(default)]
    pub remote_auth_key: Option<String>,
    #[serde(default = "default_store_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Read the store on every message instead of the in-memory snapshot.
    #[serde(default)]
    pub reload_per_message: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: None,
            file_path: None,
            remote_base_url: None,
            remote_auth_key: None,
            timeout_seconds: default_store_timeout_seconds(),
            reload_per_message: false,
        }
    }
}

/// Which persistence backend the process runs with. Chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Env,
    File { path: PathBuf },
    Remote { base_url: String, auth_key: String },
}

impl StoreConfig {
    pub fn backend(&self) -> Result<StoreBackend, ReplyError> {
        let remote = match (non_blank(&self.remote_base_url), non_blank(&self.remote_auth_key)) {
            (Some(base_url), Some(auth_key)) => Some(StoreBackend::Remote {
                base_url: base_url.trim_end_matches('/').to_string(),
                auth_key: auth_key.to_string(),
            }),
            _ => None,
        };
        let file = |path: Option<&str>| StoreBackend::File {
            path: PathBuf::from(path.unwrap_or(DEFAULT_FILE_STORE_PATH)),
        };

        match self.kind {
            Some(StoreKind::Env) => Ok(StoreBackend::Env),
            Some(StoreKind::File) => Ok(file(non_blank(&self.file_path))),
            Some(StoreKind::Remote) => remote.ok_or_else(|| {
                ReplyError::InvalidConfig(
                    "store.kind=remote requires remote_base_url and remote_auth_key".to_string(),
                )
            }),
            None => Ok(remote.unwrap_or_else(|| match non_blank(&self.file_path) {
                Some(path) => file(Some(path)),
                None => StoreBackend::Env,
            })),
        }
    }
}

const DEFAULT_FILE_STORE_PATH: &str = "config.json";

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Soft caps for the admin editor.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Reject saves over the whole-field caps; when false they are only logged.
    #[serde(default = "default_limits_enforce")]
    pub enforce: bool,
    #[serde(default = "default_limits_welcome_max_chars")]
    pub welcome_max_chars: usize,
    #[serde(default = "default_limits_default_reply_max_chars")]
    pub default_reply_max_chars: usize,
    #[serde(default = "default_limits_keywords_max_chars")]
    pub keywords_max_chars: usize,
    #[serde(default = "default_limits_buttons_max_chars")]
    pub buttons_max_chars: usize,
    #[serde(default = "default_limits_keyword_key_max_chars")]
    pub keyword_key_max_chars: usize,
    #[serde(default = "default_limits_keyword_value_max_chars")]
    pub keyword_value_max_chars: usize,
    #[serde(default = "default_limits_button_text_max_chars")]
    pub button_text_max_chars: usize,
    #[serde(default = "default_limits_button_url_max_chars")]
    pub button_url_max_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            enforce: default_limits_enforce(),
            welcome_max_chars: default_limits_welcome_max_chars(),
            default_reply_max_chars: default_limits_default_reply_max_chars(),
            keywords_max_chars: default_limits_keywords_max_chars(),
            buttons_max_chars: default_limits_buttons_max_chars(),
            keyword_key_max_chars: default_limits_keyword_key_max_chars(),
            keyword_value_max_chars: default_limits_keyword_value_max_chars(),
            button_text_max_chars: default_limits_button_text_max_chars(),
            button_url_max_chars: default_limits_button_url_max_chars(),
        }
    }
}

/// Reply config for the env backend, in the admin wire encodings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub welcome_message: Option<String>,
    #[serde(default)]
    pub default_reply: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub buttons: Option<String>,
}

impl SeedConfig {
    pub fn to_bot_config(&self) -> BotConfig {
        let mut cfg = BotConfig::default();
        if let Some(welcome) = &self.welcome_message {
            cfg.welcome_message = welcome.clone();
        }
        if let Some(reply) = &self.default_reply {
            cfg.default_reply = reply.clone();
        }
        if let Some(raw) = &self.keywords {
            cfg.keywords = parse_keywords(raw);
        }
        if let Some(raw) = &self.buttons {
            cfg.buttons = parse_buttons(raw);
        }
        cfg.with_fallbacks()
    }
}

fn default_server_listen() -> String {
    "0.0.0.0:10000".to_string()
}

fn default_telegram_buttons_triggers() -> Vec<String> {
    vec!["按钮".to_string(), "buttons".to_string()]
}

fn default_telegram_menu_prompt() -> String {
    "点击下面的按钮：".to_string()
}

fn default_telegram_menu_back_text() -> String {
    "返回主菜单".to_string()
}

fn default_telegram_menu_callback_data() -> String {
    "menu".to_string()
}

fn default_telegram_menu_return_text() -> String {
    "回到主菜单了！".to_string()
}

fn default_telegram_media_failure_text() -> String {
    "抱歉，媒体内容发送失败。".to_string()
}

fn default_admin_password() -> String {
    DEFAULT_ADMIN_PASSWORD.to_string()
}

fn default_admin_session_ttl_seconds() -> u64 {
    3600
}

fn default_store_timeout_seconds() -> u64 {
    10
}

fn default_limits_enforce() -> bool {
    true
}

fn default_limits_welcome_max_chars() -> usize {
    500
}

fn default_limits_default_reply_max_chars() -> usize {
    1000
}

fn default_limits_keywords_max_chars() -> usize {
    2000
}

fn default_limits_buttons_max_chars() -> usize {
    500
}

fn default_limits_keyword_key_max_chars() -> usize {
    100
}

fn default_limits_keyword_value_max_chars() -> usize {
    1000
}

fn default_limits_button_text_max_chars() -> usize {
    50
}

fn default_limits_button_url_max_chars() -> usize {
    200
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Optional TOML file first, then the deployment env variables on top.
    pub fn load_with_env<F>(path: &str, env: F) -> Result<Self, config::ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let trimmed = |key: &str| {
            env(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let raw = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let cfg = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .set_override_option("telegram.bot_token", trimmed("BOT_TOKEN"))?
            .set_override_option("telegram.public_url", trimmed("RENDER_EXTERNAL_URL"))?
            .set_override_option("admin.password", trimmed("ADMIN_PASSWORD"))?
            .set_override_option(
                "server.listen",
                trimmed("PORT").map(|port| format!("0.0.0.0:{port}")),
            )?
            .set_override_option("store.file_path", trimmed("CONFIG_FILE"))?
            .set_override_option("store.remote_base_url", trimmed("FIREBASE_DATABASE_URL"))?
            .set_override_option("store.remote_auth_key", trimmed("FIREBASE_API_KEY"))?
            .set_override_option("seed.welcome_message", raw("WELCOME_MESSAGE"))?
            .set_override_option("seed.default_reply", raw("DEFAULT_REPLY"))?
            .set_override_option("seed.keywords", raw("KEYWORDS"))?
            .set_override_option("seed.buttons", raw("BUTTONS"))?
            .build()?;
        cfg.try_deserialize()
    }
}
