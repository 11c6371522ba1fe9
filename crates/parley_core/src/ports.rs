//! crates/parley_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::domain::{ChatMessage, Role, User, UserCredentials};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- User Management ---
    /// Fails with `PortError::Conflict` when the username is already taken.
    async fn create_user(&self, username: &str, hashed_password: &str) -> PortResult<User>;

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User>;

    async fn get_user_by_username(&self, username: &str) -> PortResult<UserCredentials>;

    // --- Auth Methods ---
    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Returns the owning user, or `PortError::Unauthorized` for unknown or expired sessions.
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Chat History ---
    /// Appends one message. `created_at` never goes backwards within a user's history.
    async fn append_message(&self, user_id: Uuid, role: Role, text: &str) -> PortResult<ChatMessage>;

    /// All of a user's messages, oldest first.
    async fn list_messages_for_user(&self, user_id: Uuid) -> PortResult<Vec<ChatMessage>>;

    /// Deletes every message of the user atomically and returns how many were removed.
    async fn clear_messages_for_user(&self, user_id: Uuid) -> PortResult<u64>;
}

#[async_trait]
pub trait TextGenerationService: Send + Sync {
    /// Produces a complete reply for a prompt.
    ///
    /// Infallible by contract: transport failures come back as descriptive
    /// placeholder text instead of an error.
    async fn generate_reply(&self, prompt: &str) -> String;
}
