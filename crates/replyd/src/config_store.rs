use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reply_core::config::{AppConfig, StoreBackend};
use reply_core::error::ReplyError;
use reply_core::model::BotConfig;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Persistence for [`BotConfig`]. `load` never fails; `save` reports errors.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// False when `save` only affects the running process.
    fn is_persistent(&self) -> bool;

    /// Raw read. `Ok(None)` means nothing is stored yet.
    async fn fetch(&self) -> Result<Option<BotConfig>, ReplyError>;

    async fn save(&self, config: BotConfig) -> Result<BotConfig, ReplyError>;

    async fn load(&self) -> BotConfig {
        match self.fetch().await {
            Ok(Some(config)) => config.with_fallbacks(),
            Ok(None) => {
                info!("config store empty, using default: backend={}", self.backend());
                BotConfig::default()
            }
            Err(err) => {
                warn!(
                    "config load failed, using default: backend={} err={}",
                    self.backend(),
                    err
                );
                BotConfig::default()
            }
        }
    }
}

pub fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn ConfigStore>> {
    let backend = config.store.backend().context("resolve config store backend failed")?;
    let store: Arc<dyn ConfigStore> = match backend {
        StoreBackend::Env => Arc::new(EnvStore::new(config.seed.to_bot_config())),
        StoreBackend::File { path } => Arc::new(FileStore::new(path)),
        StoreBackend::Remote { base_url, auth_key } => Arc::new(RemoteStore::new(
            base_url,
            auth_key,
            Duration::from_secs(config.store.timeout_seconds.max(1)),
        )?),
    };
    info!("config store ready: backend={}", store.backend());
    Ok(store)
}

/// Config taken from the environment at startup. Saves live only in memory.
pub struct EnvStore {
    seed: BotConfig,
}

impl EnvStore {
    pub fn new(seed: BotConfig) -> Self {
        Self { seed }
    }
}

#[async_trait]
impl ConfigStore for EnvStore {
    fn backend(&self) -> &'static str {
        "env"
    }

    fn is_persistent(&self) -> bool {
        false
    }

    async fn fetch(&self) -> Result<Option<BotConfig>, ReplyError> {
        Ok(Some(self.seed.clone()))
    }

    async fn save(&self, config: BotConfig) -> Result<BotConfig, ReplyError> {
        info!("env store does not persist, config kept for this process only");
        Ok(config)
    }
}

pub struct FileStore {
    path: PathBuf,
    // 同一时刻只允许一个写入，保证最后一次保存就是磁盘上的内容。
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn write_document(&self, config: &BotConfig) -> Result<(), ReplyError> {
        let body = serde_json::to_string_pretty(config)
            .map_err(|err| ReplyError::ConfigSaveFailed(format!("serialize failed: {err}")))?;
        let _guard = self.write_lock.lock().await;
        write_atomically(&self.path, body.as_bytes())
            .await
            .map_err(|err| {
                ReplyError::ConfigSaveFailed(format!("write {} failed: {err}", self.path.display()))
            })
    }
}

async fn write_atomically(path: &Path, body: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, body).await?;
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err);
    }
    Ok(())
}

#[async_trait]
impl ConfigStore for FileStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    fn is_persistent(&self) -> bool {
        true
    }

    async fn fetch(&self) -> Result<Option<BotConfig>, ReplyError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str::<BotConfig>(&raw).map(Some).map_err(|err| {
                ReplyError::ConfigUnavailable(format!("parse {} failed: {err}", self.path.display()))
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                // 首次启动没有配置文件时写入默认配置。
                let config = BotConfig::default();
                match self.write_document(&config).await {
                    Ok(()) => info!("default config written: path={}", self.path.display()),
                    Err(err) => warn!("write default config failed: err={}", err),
                }
                Ok(Some(config))
            }
            Err(err) => Err(ReplyError::ConfigUnavailable(format!(
                "read {} failed: {err}",
                self.path.display()
            ))),
        }
    }

    async fn save(&self, config: BotConfig) -> Result<BotConfig, ReplyError> {
        self.write_document(&config).await?;
        Ok(config)
    }
}

/// Firebase-Realtime-Database-style JSON document at `{base}/config.json`.
pub struct RemoteStore {
    client: Client,
    base_url: String,
    auth_key: String,
}

impl RemoteStore {
    pub fn new(base_url: String, auth_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build remote store http client failed")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/config.json", self.base_url)
    }
}

// reqwest 错误里带完整 URL（含 auth 参数），输出前去掉。
fn describe(err: reqwest::Error) -> String {
    err.without_url().to_string()
}

#[async_trait]
impl ConfigStore for RemoteStore {
    fn backend(&self) -> &'static str {
        "remote"
    }

    fn is_persistent(&self) -> bool {
        true
    }

    async fn fetch(&self) -> Result<Option<BotConfig>, ReplyError> {
        let resp = self
            .client
            .get(self.endpoint())
            .query(&[("auth", self.auth_key.as_str())])
            .send()
            .await
            .map_err(|err| ReplyError::ConfigUnavailable(describe(err)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ReplyError::ConfigUnavailable(format!("remote status={status}")));
        }
        let body = resp
            .text()
            .await
            .map_err(|err| ReplyError::ConfigUnavailable(describe(err)))?;
        let body = body.trim();
        if body.is_empty() || body == "null" {
            return Ok(None);
        }
        serde_json::from_str::<BotConfig>(body)
            .map(Some)
            .map_err(|err| ReplyError::ConfigUnavailable(format!("parse remote config failed: {err}")))
    }

    async fn save(&self, config: BotConfig) -> Result<BotConfig, ReplyError> {
        let resp = self
            .client
            .put(self.endpoint())
            .query(&[("auth", self.auth_key.as_str())])
            .json(&config)
            .send()
            .await
            .map_err(|err| ReplyError::ConfigSaveFailed(describe(err)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ReplyError::ConfigSaveFailed(format!("remote status={status}")));
        }
        Ok(config)
    }
}

/// The config the bot currently answers with. Replaced wholesale, never edited.
pub struct ConfigSnapshot {
    current: RwLock<Arc<BotConfig>>,
}

impl ConfigSnapshot {
    pub fn new(config: BotConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn current(&self) -> Arc<BotConfig> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, config: BotConfig) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(config);
    }
}
