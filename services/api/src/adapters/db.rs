//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the SQLite database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::domain::{AuthSession, ChatMessage, Role, User, UserCredentials};
use parley_core::ports::{DatabaseService, PortError, PortResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: SqlitePool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens a pool for `database_url`.
    ///
    /// Connections never expire, so an in-memory database lives as long as the pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    created_at: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            user_id: self.id,
            username: self.username,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    id: Uuid,
    username: String,
    password_hash: String,
}
impl CredentialsRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user_id: self.id,
            username: self.username,
            hashed_password: self.password_hash,
        }
    }
}

#[derive(FromRow)]
struct AuthSessionRecord {
    id: String,
    user_id: Uuid,
    expires_at: DateTime<Utc>,
}
impl AuthSessionRecord {
    fn to_domain(self) -> AuthSession {
        AuthSession {
            id: self.id,
            user_id: self.user_id,
            expires_at: self.expires_at,
        }
    }
}

#[derive(FromRow)]
struct ChatMessageRecord {
    id: i64,
    user_id: Uuid,
    role: String,
    text: String,
    created_at: DateTime<Utc>,
}
impl ChatMessageRecord {
    fn to_domain(self) -> PortResult<ChatMessage> {
        let role = self
            .role
            .parse::<Role>()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(ChatMessage {
            id: self.id,
            user_id: self.user_id,
            role,
            text: self.text,
            created_at: self.created_at,
        })
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user(&self, username: &str, hashed_password: &str) -> PortResult<User> {
        let user = User {
            user_id: Uuid::new_v4(),
            username: username.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO users (id, username, password_hash, created_at) VALUES (?, ?, ?, ?)")
            .bind(user.user_id)
            .bind(&user.username)
            .bind(hashed_password)
            .bind(user.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    PortError::Conflict(format!("Username '{}' already exists", username))
                }
                _ => unexpected(e),
            })?;

        Ok(user)
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, created_at FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("User {} not found", user_id)),
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn get_user_by_username(&self, username: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT id, username, password_hash FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("User '{}' not found", username)),
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let session = sqlx::query_as::<_, AuthSessionRecord>(
            "SELECT id, user_id, expires_at FROM auth_sessions WHERE id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .map(AuthSessionRecord::to_domain)
        .ok_or(PortError::Unauthorized)?;

        if session.expires_at <= Utc::now() {
            self.delete_auth_session(&session.id).await?;
            return Err(PortError::Unauthorized);
        }

        Ok(session.user_id)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn append_message(&self, user_id: Uuid, role: Role, text: &str) -> PortResult<ChatMessage> {
        // Clamp and insert in one statement: a single write takes the write lock up front,
        // so concurrent appends wait on the busy timeout instead of failing.
        // Timestamps are stored as RFC 3339 UTC text, so MAX() orders them chronologically.
        let (id, created_at) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            "INSERT INTO chat_messages (user_id, role, text, created_at) \
             SELECT ?1, ?2, ?3, MAX(?4, COALESCE( \
                 (SELECT created_at FROM chat_messages WHERE user_id = ?1 ORDER BY id DESC LIMIT 1), \
                 ?4)) \
             RETURNING id, created_at",
        )
        .bind(user_id)
        .bind(role.as_str())
        .bind(text)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(ChatMessage {
            id,
            user_id,
            role,
            text: text.to_string(),
            created_at,
        })
    }

    async fn list_messages_for_user(&self, user_id: Uuid) -> PortResult<Vec<ChatMessage>> {
        let records = sqlx::query_as::<_, ChatMessageRecord>(
            "SELECT id, user_id, role, text, created_at FROM chat_messages WHERE user_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn clear_messages_for_user(&self, user_id: Uuid) -> PortResult<u64> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let deleted = sqlx::query("DELETE FROM chat_messages WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?
            .rows_affected();

        tx.commit().await.map_err(unexpected)?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    async fn test_db() -> DbAdapter {
        let db = DbAdapter::connect("sqlite::memory:", 1).await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    #[tokio::test]
    async fn duplicate_username_is_a_conflict() {
        let db = test_db().await;
        db.create_user("alice", "hash").await.unwrap();

        let err = db.create_user("alice", "other-hash").await.unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn credentials_lookup_returns_the_stored_hash() {
        let db = test_db().await;
        let user = db.create_user("alice", "$argon2id$stub").await.unwrap();

        let creds = db.get_user_by_username("alice").await.unwrap();
        assert_eq!(creds.user_id, user.user_id);
        assert_eq!(creds.hashed_password, "$argon2id$stub");

        let fetched = db.get_user_by_id(user.user_id).await.unwrap();
        assert_eq!(fetched.username, "alice");

        assert!(matches!(
            db.get_user_by_username("bob").await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn history_is_ordered_oldest_first_and_append_only() {
        let db = test_db().await;
        let user = db.create_user("alice", "hash").await.unwrap();

        db.append_message(user.user_id, Role::User, "one").await.unwrap();
        db.append_message(user.user_id, Role::Assistant, "two").await.unwrap();
        let first_read = db.list_messages_for_user(user.user_id).await.unwrap();

        db.append_message(user.user_id, Role::User, "three").await.unwrap();
        let second_read = db.list_messages_for_user(user.user_id).await.unwrap();

        let texts: Vec<&str> = second_read.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["one", "two", "three"]);
        for (earlier, later) in first_read.iter().zip(second_read.iter()) {
            assert_eq!(earlier.id, later.id);
        }
        assert!(second_read
            .windows(2)
            .all(|pair| pair[0].created_at <= pair[1].created_at));
    }

    #[tokio::test]
    async fn append_never_moves_backwards_in_time() {
        let db = test_db().await;
        let user = db.create_user("alice", "hash").await.unwrap();
        let future = Utc::now() + ChronoDuration::hours(1);

        sqlx::query("INSERT INTO chat_messages (user_id, role, text, created_at) VALUES (?, 'user', 'early', ?)")
            .bind(user.user_id)
            .bind(future)
            .execute(&db.pool)
            .await
            .unwrap();

        let appended = db.append_message(user.user_id, Role::Assistant, "late").await.unwrap();
        assert_eq!(appended.created_at, future);

        let history = db.list_messages_for_user(user.user_id).await.unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["early", "late"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_on_a_shared_file_database_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("chat.db").display());
        let db = DbAdapter::connect(&url, 4).await.unwrap();
        db.run_migrations().await.unwrap();
        let user = db.create_user("alice", "hash").await.unwrap();

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let db = db.clone();
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                tokio::spawn(async move {
                    db.append_message(user.user_id, role, &format!("m{i}")).await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let history = db.list_messages_for_user(user.user_id).await.unwrap();
        assert_eq!(history.len(), 32);
        assert!(history.windows(2).all(|pair| {
            pair[0].created_at <= pair[1].created_at && pair[0].id < pair[1].id
        }));
    }

    #[tokio::test]
    async fn clear_only_touches_the_given_user() {
        let db = test_db().await;
        let alice = db.create_user("alice", "hash").await.unwrap();
        let bob = db.create_user("bob", "hash").await.unwrap();

        db.append_message(alice.user_id, Role::User, "hi").await.unwrap();
        db.append_message(alice.user_id, Role::Assistant, "hello").await.unwrap();
        db.append_message(bob.user_id, Role::User, "hey").await.unwrap();

        assert_eq!(db.clear_messages_for_user(alice.user_id).await.unwrap(), 2);
        assert_eq!(db.clear_messages_for_user(alice.user_id).await.unwrap(), 0);

        assert!(db.list_messages_for_user(alice.user_id).await.unwrap().is_empty());
        assert_eq!(db.list_messages_for_user(bob.user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_clears_report_a_positive_count_once() {
        let db = test_db().await;
        let alice = db.create_user("alice", "hash").await.unwrap();
        for i in 0..4 {
            db.append_message(alice.user_id, Role::User, &format!("m{i}")).await.unwrap();
        }

        let (a, b) = tokio::join!(
            db.clear_messages_for_user(alice.user_id),
            db.clear_messages_for_user(alice.user_id)
        );
        let mut counts = [a.unwrap(), b.unwrap()];
        counts.sort();
        assert_eq!(counts, [0, 4]);
    }

    #[tokio::test]
    async fn sessions_validate_until_deleted_or_expired() {
        let db = test_db().await;
        let user = db.create_user("alice", "hash").await.unwrap();

        db.create_auth_session("live", user.user_id, Utc::now() + ChronoDuration::days(1))
            .await
            .unwrap();
        db.create_auth_session("stale", user.user_id, Utc::now() - ChronoDuration::seconds(1))
            .await
            .unwrap();

        assert_eq!(db.validate_auth_session("live").await.unwrap(), user.user_id);
        assert!(matches!(
            db.validate_auth_session("stale").await,
            Err(PortError::Unauthorized)
        ));
        assert!(matches!(
            db.validate_auth_session("missing").await,
            Err(PortError::Unauthorized)
        ));

        db.delete_auth_session("live").await.unwrap();
        assert!(matches!(
            db.validate_auth_session("live").await,
            Err(PortError::Unauthorized)
        ));
    }
}
