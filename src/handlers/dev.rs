use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Deserialize)]
pub struct DevMessage {
    pub from_phone: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct DevResponse {
    pub reply: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs one message through the conversation synchronously, bypassing WhatsApp.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DevMessage>,
) -> Response {
    let from = payload.from_phone.trim().to_string();
    let body = payload.message.trim().to_string();

    if from.is_empty() || body.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(DevResponse {
                reply: String::new(),
                success: false,
                error: Some("from_phone and message are required".to_string()),
            }),
        )
            .into_response();
    }

    tracing::info!(from = %from, body = %body, "dev message");
    let reply = state.engine.handle_message(&from, &body).await;

    Json(DevResponse {
        reply,
        success: true,
        error: None,
    })
    .into_response()
}
