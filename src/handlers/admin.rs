use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Local;
use serde::Serialize;

use crate::config::SessionBackendKind;
use crate::errors::AppError;
use crate::models::Session;
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

// GET /api/admin/status
#[derive(Serialize)]
pub struct StatusResponse {
    uptime_secs: i64,
    active_sessions: usize,
    sectors: usize,
    session_backend: &'static str,
    whatsapp_enabled: bool,
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let uptime = Local::now().naive_local() - state.started_at;
    Ok(Json(StatusResponse {
        uptime_secs: uptime.num_seconds(),
        active_sessions: state.engine.sessions().count()?,
        sectors: state.directory.len(),
        session_backend: match state.config.session_backend {
            SessionBackendKind::Memory => "memory",
            SessionBackendKind::Sqlite => "sqlite",
        },
        whatsapp_enabled: state.config.whatsapp_enabled(),
    }))
}

// GET /api/admin/sessions/:phone
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(phone): Path<String>,
) -> Result<Json<Session>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    state
        .engine
        .sessions()
        .get(&phone)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("session {phone}")))
}

// POST /api/admin/sessions/:phone/reset
#[derive(Serialize)]
pub struct ResetResponse {
    removed: bool,
}

pub async fn reset_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(phone): Path<String>,
) -> Result<Json<ResetResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let sessions = state.engine.sessions();
    let guard = sessions.lock(&phone).await;
    let removed = sessions.remove(&guard)?;
    tracing::info!(phone = %phone, removed, "session reset by admin");

    Ok(Json(ResetResponse { removed }))
}

// POST /api/admin/directory/reload
#[derive(Serialize)]
pub struct ReloadResponse {
    sectors: usize,
}

pub async fn reload_directory(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ReloadResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let sectors = {
        let db = state
            .db
            .lock()
            .map_err(|_| AppError::Internal("database lock poisoned".to_string()))?;
        state.directory.reload(&db)?
    };

    Ok(Json(ReloadResponse { sectors }))
}
