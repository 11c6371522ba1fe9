pub mod auth;
pub mod chat_task;
pub mod middleware;
pub mod rest;
pub mod state;

pub use middleware::require_auth;
pub use rest::{chat_handler, clear_chat_handler, history_handler, history_page_handler};

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use auth::{login_handler, logout_handler, me_handler, signup_handler};
use state::AppState;

/// Builds the application routes. CORS and the Swagger UI are layered on by the binary.
pub fn router(app_state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/signup", post(signup_handler))
        .route("/login", post(login_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/logout", post(logout_handler))
        .route("/history", get(history_page_handler))
        .route("/api/me", get(me_handler))
        .route("/api/history", get(history_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/clear-chat", post(clear_chat_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
