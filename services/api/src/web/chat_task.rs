//! services/api/src/web/chat_task.rs
//!
//! This module contains the function responsible for a single chat turn:
//! store the user's message, ask the model, store and return the reply.

use crate::web::state::AppState;
use parley_core::{domain::Role, ports::PortResult};
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Where a turn is in its lifecycle. Lives only for the duration of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStage {
    Received,
    UserPersisted,
    InferenceComplete,
    AssistantPersisted,
    Done,
}

/// Returns the trimmed prompt, or `None` when there is nothing to send.
pub fn validate_text(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

/// Runs one turn for `user_id`. `text` must already be validated.
///
/// The user's message is kept even if the model is unreachable; in that case
/// the stored reply is the error text produced by the inference adapter.
/// Only store failures make a turn fail.
pub async fn run_turn(app_state: &AppState, user_id: Uuid, text: &str) -> PortResult<String> {
    let mut stage = TurnStage::Received;
    debug!(%user_id, ?stage, "Chat turn started");

    app_state.db.append_message(user_id, Role::User, text).await?;
    stage = TurnStage::UserPersisted;
    debug!(%user_id, ?stage);

    let llm_start = Instant::now();
    let reply = app_state.inference.generate_reply(text).await;
    stage = TurnStage::InferenceComplete;
    debug!(%user_id, ?stage, "⏱️ LLM took: {:?}", llm_start.elapsed());

    app_state.db.append_message(user_id, Role::Assistant, &reply).await?;
    stage = TurnStage::AssistantPersisted;
    debug!(%user_id, ?stage);

    stage = TurnStage::Done;
    info!(%user_id, ?stage, reply_len = reply.len(), "Chat turn complete");
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{DbAdapter, OllamaAdapter};
    use crate::config::Config;
    use async_trait::async_trait;
    use parley_core::ports::{DatabaseService, TextGenerationService};
    use std::sync::Arc;
    use std::time::Duration;
    use tracing::Level;

    struct EchoModel;

    #[async_trait]
    impl TextGenerationService for EchoModel {
        async fn generate_reply(&self, prompt: &str) -> String {
            format!("echo: {prompt}")
        }
    }

    fn test_config() -> Config {
        Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            database_url: "sqlite::memory:".to_string(),
            database_max_connections: 1,
            log_level: Level::INFO,
            ollama_url: "http://127.0.0.1:9".to_string(),
            llm_model: "llama2:7b".to_string(),
            inference_timeout: Duration::from_millis(500),
            session_ttl_days: 30,
            secure_cookies: false,
            cors_origin: "http://localhost:3000".to_string(),
        }
    }

    async fn test_state(inference: Arc<dyn TextGenerationService>) -> (AppState, Uuid) {
        let db = DbAdapter::connect("sqlite::memory:", 1).await.unwrap();
        db.run_migrations().await.unwrap();
        let user = db.create_user("alice", "hash").await.unwrap();
        let state = AppState {
            db: Arc::new(db),
            config: Arc::new(test_config()),
            inference,
        };
        (state, user.user_id)
    }

    #[test]
    fn validation_trims_and_rejects_empty_text() {
        assert_eq!(validate_text(Some("  Hello \n")), Some("Hello"));
        assert_eq!(validate_text(Some("   ")), None);
        assert_eq!(validate_text(None), None);
    }

    #[tokio::test]
    async fn a_turn_stores_user_then_assistant() {
        let (state, user_id) = test_state(Arc::new(EchoModel)).await;

        let reply = run_turn(&state, user_id, "Hello").await.unwrap();
        assert_eq!(reply, "echo: Hello");

        let history = state.db.list_messages_for_user(user_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].text, "Hello");
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].text, "echo: Hello");
        assert!(history[1].created_at >= history[0].created_at);
    }

    #[tokio::test]
    async fn unreachable_model_still_completes_the_turn() {
        let config = test_config();
        let model = OllamaAdapter::new(
            &config.ollama_url,
            config.llm_model.clone(),
            config.inference_timeout,
        )
        .unwrap();
        let (state, user_id) = test_state(Arc::new(model)).await;

        let reply = run_turn(&state, user_id, "Hello").await.unwrap();
        assert!(reply.starts_with("Error contacting model: "), "got {reply}");

        let history = state.db.list_messages_for_user(user_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "Hello");
        assert_eq!(history[1].text, reply);
    }

    #[tokio::test]
    async fn concurrent_turns_keep_each_pair_consistent() {
        let (state, user_id) = test_state(Arc::new(EchoModel)).await;

        let (a, b) = tokio::join!(
            run_turn(&state, user_id, "first"),
            run_turn(&state, user_id, "second")
        );
        a.unwrap();
        b.unwrap();

        let history = state.db.list_messages_for_user(user_id).await.unwrap();
        assert_eq!(history.len(), 4);
        assert!(history
            .windows(2)
            .all(|pair| (pair[0].created_at, pair[0].id) < (pair[1].created_at, pair[1].id)));
        for prompt in ["first", "second"] {
            let user_pos = history.iter().position(|m| m.text == prompt).unwrap();
            let reply_pos = history
                .iter()
                .position(|m| m.text == format!("echo: {prompt}"))
                .unwrap();
            assert!(user_pos < reply_pos);
        }
    }
}
