use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use reply_core::config::{AppConfig, LimitsConfig, DEFAULT_ADMIN_PASSWORD, DEFAULT_CONFIG_PATH};
use reply_core::types::{ApiResponse, HealthResponse};
use tracing::{debug, error, info, warn};

mod admin_pages;
mod admin_panel;
mod chat_lanes;
mod config_store;
mod telegram_gateway;
#[cfg(test)]
mod test_support;

use admin_panel::AdminGate;
use chat_lanes::ChatLanes;
use config_store::{ConfigSnapshot, ConfigStore};
use telegram_gateway::{classify_update, parse_update, ReplyGateway, ReplySink, TelegramSink};

const CHAT_LANE_IDLE_SECONDS: u64 = 60;

#[derive(Clone)]
pub(crate) struct AppState {
    started_at: Instant,
    gateway: ReplyGateway,
    lanes: Arc<ChatLanes>,
    admin: Arc<AdminGate>,
    limits: LimitsConfig,
    public_url: Option<String>,
}

/// Loads the initial snapshot from `store` and wires the runtime together.
async fn build_state(
    config: &AppConfig,
    store: Arc<dyn ConfigStore>,
    sink: Arc<dyn ReplySink>,
) -> AppState {
    let initial = store.load().await;
    info!(
        "initial config: backend={} keywords={} buttons={}",
        store.backend(),
        initial.keywords.len(),
        initial.buttons.len()
    );
    let snapshot = Arc::new(ConfigSnapshot::new(initial));
    let gateway = ReplyGateway::new(
        &config.telegram,
        sink,
        store,
        snapshot,
        config.store.reload_per_message,
    );
    let lanes = ChatLanes::new(gateway.clone(), Duration::from_secs(CHAT_LANE_IDLE_SECONDS));
    AppState {
        started_at: Instant::now(),
        gateway,
        lanes,
        admin: Arc::new(AdminGate::new(
            config.admin.password.clone(),
            Duration::from_secs(config.admin.session_ttl_seconds.max(60)),
        )),
        limits: config.limits.clone(),
        public_url: config.telegram.public_url.clone(),
    }
}

fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/v1/health", get(health))
        .route("/webhook", post(webhook))
        .route("/set-webhook", get(set_webhook))
        .merge(admin_panel::routes())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // 默认用 info 级别，若设置 RUST_LOG 则以环境变量为准。
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_target(false)
        .compact()
        .init();

    let config_path =
        std::env::var("REPLYBOT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("load config failed: path={config_path}"))?;
    if config.telegram.bot_token.trim().is_empty() {
        error!("BOT_TOKEN is not set, refusing to start");
        anyhow::bail!("missing bot token");
    }
    if config.admin.password == DEFAULT_ADMIN_PASSWORD {
        warn!("ADMIN_PASSWORD not set, admin panel uses the built-in default password");
    }

    let store = config_store::build_store(&config)?;
    let sink: Arc<dyn ReplySink> = Arc::new(TelegramSink::new(&config.telegram.bot_token));
    let state = build_state(&config, store, sink).await;

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("bind failed: listen={}", config.server.listen))?;
    info!("replyd listening on {}", config.server.listen);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn root() -> &'static str {
    "✅ Telegram 机器人运行中！"
}

async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let config = state.gateway.snapshot.current();
    let data = HealthResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        store_backend: state.gateway.store.backend().to_string(),
        store_persistent: state.gateway.store.is_persistent(),
        keyword_count: config.keywords.len(),
        button_count: config.buttons.len(),
        active_chat_lanes: state.lanes.active(),
    };

    Json(ApiResponse {
        ok: true,
        data: Some(data),
        error: None,
    })
}

/// Always 200: Telegram retries anything else, and the reply is sent separately.
async fn webhook(State(state): State<AppState>, body: Bytes) -> StatusCode {
    match parse_update(&body) {
        Ok(update) => match classify_update(&update) {
            Some(inbound) => state.lanes.dispatch(inbound),
            None => debug!("webhook: update_id={:?} ignored", update.id),
        },
        Err(err) => warn!("webhook: {} body_bytes={}", err, body.len()),
    }
    StatusCode::OK
}

fn webhook_url(public_url: Option<&str>, headers: &HeaderMap) -> Option<String> {
    let base = match public_url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => url.to_string(),
        None => {
            let host = headers.get(header::HOST)?.to_str().ok()?.trim();
            if host.is_empty() {
                return None;
            }
            format!("https://{host}")
        }
    };
    Some(format!("{}/webhook", base.trim_end_matches('/')))
}

async fn set_webhook(State(state): State<AppState>, headers: HeaderMap) -> (StatusCode, String) {
    let Some(url) = webhook_url(state.public_url.as_deref(), &headers) else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "❌ Webhook 设置失败: 无法确定服务的公开地址".to_string(),
        );
    };
    match state.gateway.sink.set_webhook(&url).await {
        Ok(()) => {
            info!("webhook registered: url={}", url);
            (StatusCode::OK, format!("✅ Webhook 设置成功！\n{url}"))
        }
        Err(err) => {
            warn!("webhook register failed: url={} err={:#}", url, err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("❌ Webhook 设置失败: {err:#}"),
            )
        }
    }
}
