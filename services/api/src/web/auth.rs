//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user signup, login, and logout.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use parley_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;
use utoipa::ToSchema;
use crate::config::Config;
use crate::web::state::{AppState, CurrentUser};

const SESSION_COOKIE: &str = "session";

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub username: String,
}

//=========================================================================================
// Cookie Helpers
//=========================================================================================

/// Pulls the session id out of the `Cookie` header, if any.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|c| c.trim().strip_prefix("session="))
        .filter(|id| !id.is_empty())
}

fn session_cookie(config: &Config, session_id: &str, max_age_secs: i64) -> String {
    let secure = if config.secure_cookies { " Secure;" } else { "" };
    format!(
        "{}={}; HttpOnly;{} SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE, session_id, secure, max_age_secs
    )
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /signup - Create a new user account
#[utoipa::path(
    post,
    path = "/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created successfully", body = AuthResponse),
        (status = 400, description = "Empty username or password"),
        (status = 409, description = "Username already exists"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Username and password are required".to_string(),
        ));
    }

    // 1. Hash the password
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to hash password".to_string())
        })?
        .to_string();

    // 2. Create user in database
    let user = state
        .db
        .create_user(username, &password_hash)
        .await
        .map_err(|e| match e {
            PortError::Conflict(_) => (StatusCode::CONFLICT, "Username already exists".to_string()),
            other => {
                error!("Failed to create user: {:?}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create user".to_string())
            }
        })?;

    info!(user_id = %user.user_id, "New user signed up");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id: user.user_id,
            username: user.username,
        }),
    ))
}

/// POST /login - Login with existing account
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let invalid = || (StatusCode::UNAUTHORIZED, "Invalid username or password".to_string());

    // 1. Get user by username
    let user_creds = state
        .db
        .get_user_by_username(req.username.trim())
        .await
        .map_err(|e| match e {
            PortError::NotFound(_) => invalid(),
            other => {
                error!("Failed to get user: {:?}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, "Authentication error".to_string())
            }
        })?;

    // 2. Verify password
    let parsed_hash = PasswordHash::new(&user_creds.hashed_password).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Authentication error".to_string())
    })?;

    if Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(invalid());
    }

    // 3. Create auth session in database
    let auth_session_id = Uuid::new_v4().to_string();
    let ttl = Duration::days(state.config.session_ttl_days);
    state
        .db
        .create_auth_session(&auth_session_id, user_creds.user_id, Utc::now() + ttl)
        .await
        .map_err(|e| {
            error!("Failed to create auth session: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session".to_string())
        })?;

    info!(user_id = %user_creds.user_id, "User logged in");

    // 4. Return response with cookie
    let cookie = session_cookie(&state.config, &auth_session_id, ttl.num_seconds());
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            user_id: user_creds.user_id,
            username: user_creds.username,
        }),
    ))
}

/// POST /logout - Logout and invalidate session
#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .db
        .delete_auth_session(&current.session_id)
        .await
        .map_err(|e| {
            error!("Failed to delete auth session: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to logout".to_string())
        })?;

    info!(user_id = %current.user_id, "User logged out");

    let cookie = session_cookie(&state.config, "", 0);
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)]))
}

/// GET /api/me - The logged-in user
#[utoipa::path(
    get,
    path = "/api/me",
    responses(
        (status = 200, description = "Current user", body = AuthResponse),
        (status = 401, description = "No active session")
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    let user = state.db.get_user_by_id(current.user_id).await.map_err(|e| {
        error!("Failed to load user {}: {:?}", current.user_id, e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to load user".to_string())
    })?;

    Ok(Json(AuthResponse {
        user_id: user.user_id,
        username: user.username,
    }))
}
