//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use parley_core::ports::PortError;
use std::sync::Arc;
use tracing::error;

use crate::web::auth::session_id_from_headers;
use crate::web::state::{AppState, CurrentUser};

/// Middleware that validates the auth session cookie and identifies the caller.
///
/// If valid, inserts a `CurrentUser` into request extensions for handlers to use.
/// If invalid, expired or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let session_id = session_id_from_headers(req.headers())
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_string();

    let user_id = state
        .db
        .validate_auth_session(&session_id)
        .await
        .map_err(|e| match e {
            PortError::Unauthorized => StatusCode::UNAUTHORIZED,
            other => {
                error!("Failed to validate auth session: {:?}", other);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    req.extensions_mut().insert(CurrentUser { user_id, session_id });

    Ok(next.run(req).await)
}
