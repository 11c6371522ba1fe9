//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the chat REST endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::{
    auth::{self, AuthResponse, LoginRequest, SignupRequest},
    chat_task::{run_turn, validate_text},
    state::{AppState, CurrentUser},
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use parley_core::domain::ChatMessage;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::me_handler,
        history_handler,
        history_page_handler,
        chat_handler,
        clear_chat_handler,
    ),
    components(
        schemas(
            SignupRequest,
            LoginRequest,
            AuthResponse,
            HistoryEntry,
            ChatRequest,
            ChatResponse,
            ErrorResponse,
            ClearChatResponse,
            ClearChatError,
        )
    ),
    tags(
        (name = "Parley Chat API", description = "Authenticated chat backed by a local Ollama model.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// One message as returned by the history endpoint.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct HistoryEntry {
    pub role: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl From<ChatMessage> for HistoryEntry {
    fn from(message: ChatMessage) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            text: message.text,
            created_at: message.created_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct ChatRequest {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChatResponse {
    pub reply: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ClearChatResponse {
    pub success: bool,
    pub message: String,
    pub deleted_count: u64,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ClearChatError {
    pub success: bool,
    pub error: String,
}

type JsonError = (StatusCode, Json<ErrorResponse>);

fn internal_error(message: &str) -> JsonError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// The caller's chat history, oldest first.
#[utoipa::path(
    get,
    path = "/api/history",
    responses(
        (status = 200, description = "Chat history", body = [HistoryEntry]),
        (status = 401, description = "No active session"),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn history_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<Vec<HistoryEntry>>, JsonError> {
    let messages = app_state
        .db
        .list_messages_for_user(current.user_id)
        .await
        .map_err(|e| {
            error!("Failed to load history for {}: {:?}", current.user_id, e);
            internal_error("Failed to load history")
        })?;

    Ok(Json(messages.into_iter().map(HistoryEntry::from).collect()))
}

/// The same history rendered as a plain-text transcript.
#[utoipa::path(
    get,
    path = "/history",
    responses(
        (status = 200, description = "Transcript, one message per line", content_type = "text/plain", body = String),
        (status = 401, description = "No active session"),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn history_page_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, JsonError> {
    let messages = app_state
        .db
        .list_messages_for_user(current.user_id)
        .await
        .map_err(|e| {
            error!("Failed to load history for {}: {:?}", current.user_id, e);
            internal_error("Failed to load history")
        })?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        render_transcript(&messages),
    ))
}

fn render_transcript(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for m in messages {
        // Writing into a String cannot fail.
        let _ = writeln!(out, "[{}] {}: {}", m.created_at.to_rfc3339(), m.role, m.text);
    }
    out
}

/// Send a message and wait for the model's complete reply.
#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "The assistant's reply (or model error text)", body = ChatResponse),
        (status = 400, description = "Missing or empty text", body = ErrorResponse),
        (status = 401, description = "No active session"),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn chat_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, JsonError> {
    let text = payload.ok().and_then(|Json(req)| req.text);
    let Some(text) = validate_text(text.as_deref()) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "no text".to_string(),
            }),
        ));
    };

    match run_turn(&app_state, current.user_id, text).await {
        Ok(reply) => Ok(Json(ChatResponse { reply })),
        Err(e) => {
            error!("Chat turn failed for {}: {:?}", current.user_id, e);
            Err(internal_error("Failed to save chat message"))
        }
    }
}

/// Delete every message of the caller.
#[utoipa::path(
    post,
    path = "/api/clear-chat",
    responses(
        (status = 200, description = "Chat cleared", body = ClearChatResponse),
        (status = 401, description = "No active session"),
        (status = 500, description = "Nothing was deleted", body = ClearChatError)
    )
)]
pub async fn clear_chat_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<ClearChatResponse>, (StatusCode, Json<ClearChatError>)> {
    match app_state.db.clear_messages_for_user(current.user_id).await {
        Ok(deleted_count) => {
            info!("Deleted {} messages for user {}", deleted_count, current.user_id);
            Ok(Json(ClearChatResponse {
                success: true,
                message: "Chat cleared successfully".to_string(),
                deleted_count,
            }))
        }
        Err(e) => {
            error!("Error clearing chat for {}: {:?}", current.user_id, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ClearChatError {
                    success: false,
                    error: e.to_string(),
                }),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parley_core::domain::Role;
    use uuid::Uuid;

    #[test]
    fn transcript_has_one_line_per_message() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let user_id = Uuid::new_v4();
        let messages = vec![
            ChatMessage { id: 1, user_id, role: Role::User, text: "Hello".into(), created_at: at },
            ChatMessage { id: 2, user_id, role: Role::Assistant, text: "Hi!".into(), created_at: at },
        ];

        assert_eq!(
            render_transcript(&messages),
            "[2024-05-01T12:00:00+00:00] user: Hello\n[2024-05-01T12:00:00+00:00] assistant: Hi!\n"
        );
    }
}
