//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-request identity.

use crate::config::Config;
use parley_core::ports::{DatabaseService, TextGenerationService};
use std::sync::Arc;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub inference: Arc<dyn TextGenerationService>,
}

//=========================================================================================
// CurrentUser (Specific to One Authenticated Request)
//=========================================================================================

/// Inserted into request extensions by `require_auth`.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub session_id: String,
}
