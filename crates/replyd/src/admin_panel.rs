use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use reply_core::error::ReplyError;
use reply_core::form::ConfigForm;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::admin_pages::{dashboard_page, login_page, Notice};
use crate::AppState;

const SESSION_COOKIE: &str = "admin_session";

/// Password check plus short-lived session tokens for the admin panel.
pub struct AdminGate {
    password: String,
    ttl: Duration,
    sessions: Mutex<HashMap<String, Instant>>,
}

impl AdminGate {
    pub fn new(password: impl Into<String>, ttl: Duration) -> Self {
        Self {
            password: password.into(),
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn verify_password(&self, candidate: &str) -> Result<(), ReplyError> {
        if bool::from(candidate.as_bytes().ct_eq(self.password.as_bytes())) {
            Ok(())
        } else {
            Err(ReplyError::AdminAuthFailed)
        }
    }

    pub fn open_session(&self) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let mut sessions = self.lock_sessions();
        let now = Instant::now();
        sessions.retain(|_, expires_at| *expires_at > now);
        sessions.insert(token.clone(), now + self.ttl);
        token
    }

    pub fn session_valid(&self, token: &str) -> bool {
        let mut sessions = self.lock_sessions();
        let now = Instant::now();
        let live = sessions.get(token).is_some_and(|expires_at| *expires_at > now);
        if !live {
            sessions.remove(token);
        }
        live
    }

    pub fn close_session(&self, token: &str) {
        self.lock_sessions().remove(token);
    }

    fn ttl_seconds(&self) -> u64 {
        self.ttl.as_secs()
    }
}

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin", get(admin_index))
        .route("/admin/login", post(admin_login))
        .route("/admin/dashboard", get(admin_dashboard))
        .route("/admin/save", post(admin_save))
        .route("/admin/logout", get(admin_logout))
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
    })
}

fn has_session(state: &AppState, headers: &HeaderMap) -> bool {
    session_token(headers).is_some_and(|token| state.admin.session_valid(&token))
}

async fn admin_index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if has_session(&state, &headers) {
        return Redirect::to("/admin/dashboard").into_response();
    }
    Html(login_page(None)).into_response()
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    #[serde(default)]
    password: String,
}

async fn admin_login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    if let Err(err) = state.admin.verify_password(&form.password) {
        warn!("admin login rejected: {}", err);
        let page = login_page(Some(&Notice::Error("密码错误！".to_string())));
        return (StatusCode::UNAUTHORIZED, Html(page)).into_response();
    }
    let token = state.admin.open_session();
    info!("admin login ok");
    let cookie = format!(
        "{SESSION_COOKIE}={token}; Path=/admin; HttpOnly; SameSite=Lax; Max-Age={}",
        state.admin.ttl_seconds()
    );
    ([(header::SET_COOKIE, cookie)], Redirect::to("/admin/dashboard")).into_response()
}

fn render_dashboard(state: &AppState, form: &ConfigForm, notice: Option<&Notice>) -> String {
    let store = &state.gateway.store;
    dashboard_page(form, store.backend(), store.is_persistent(), &state.limits, notice)
}

async fn admin_dashboard(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !has_session(&state, &headers) {
        return Redirect::to("/admin").into_response();
    }
    // env 后端重新读取只会拿回启动时的配置，会覆盖本进程内的修改。
    // 后端读取失败时保留当前快照，不退回默认配置。
    if state.gateway.store.is_persistent() {
        if let Err(err) = state.gateway.refresh_snapshot().await {
            warn!("dashboard refresh failed, showing cached config: err={}", err);
        }
    }
    let current = state.gateway.snapshot.current();
    Html(render_dashboard(&state, &ConfigForm::from_config(&current), None)).into_response()
}

async fn admin_save(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<ConfigForm>, FormRejection>,
) -> Response {
    if !has_session(&state, &headers) {
        return Redirect::to("/admin").into_response();
    }
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => {
            warn!("admin save: bad form body: {}", rejection);
            return rejection.into_response();
        }
    };

    let current = state.gateway.snapshot.current();
    let outcome = match form.apply(&current, &state.limits) {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!("admin save rejected: {}", err);
            let notice = Notice::Error(format!("❌ 保存失败：{err}"));
            return (
                StatusCode::BAD_REQUEST,
                Html(render_dashboard(&state, &form, Some(&notice))),
            )
                .into_response();
        }
    };
    for warning in &outcome.warnings {
        warn!("admin save over soft limit: {}", warning);
    }

    let store = &state.gateway.store;
    match state.gateway.save_config(outcome.config).await {
        Ok(saved) => {
            info!(
                "config saved: backend={} keywords={} buttons={}",
                store.backend(),
                saved.keywords.len(),
                saved.buttons.len()
            );
            let form = ConfigForm::from_config(&saved);
            let message = if store.is_persistent() {
                "✅ 配置已保存！"
            } else {
                "✅ 配置已更新（仅当前进程有效，重启后恢复环境变量配置）"
            };
            Html(render_dashboard(&state, &form, Some(&Notice::Success(message.to_string()))))
                .into_response()
        }
        Err(err) => {
            warn!("config save failed: backend={} err={}", store.backend(), err);
            let notice = Notice::Error(format!("❌ 保存失败：{err}"));
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(render_dashboard(&state, &form, Some(&notice))),
            )
                .into_response()
        }
    }
}

async fn admin_logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.admin.close_session(&token);
    }
    let cookie = format!("{SESSION_COOKIE}=; Path=/admin; HttpOnly; SameSite=Lax; Max-Age=0");
    ([(header::SET_COOKIE, cookie)], Redirect::to("/admin")).into_response()
}
