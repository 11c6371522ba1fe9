//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    pub log_level: Level,
    pub ollama_url: String,
    pub llm_model: String,
    pub inference_timeout: Duration,
    pub session_ttl_days: i64,
    pub secure_cookies: bool,
    pub cors_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address: SocketAddr = parse_var("BIND_ADDRESS", "0.0.0.0:5000")?;
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://voice_chat.db?mode=rwc".to_string());
        let database_max_connections: u32 = parse_var("DATABASE_MAX_CONNECTIONS", "1")?;
        if database_max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "DATABASE_MAX_CONNECTIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Inference Settings ---
        let ollama_url = std::env::var("OLLAMA_URL")
            .unwrap_or_else(|_| "http://localhost:11434".to_string())
            .trim_end_matches('/')
            .to_string();
        let llm_model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "llama2:7b".to_string());
        let inference_timeout =
            Duration::from_secs(parse_var::<u64>("INFERENCE_TIMEOUT_SECS", "60")?);

        // --- Load Session and HTTP Settings ---
        let session_ttl_days = validate_session_ttl(parse_var("SESSION_TTL_DAYS", "30")?)?;
        let secure_cookies: bool = parse_var("SECURE_COOKIES", "false")?;
        let cors_origin = std::env::var("CORS_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        Ok(Self {
            bind_address,
            database_url,
            database_max_connections,
            log_level,
            ollama_url,
            llm_model,
            inference_timeout,
            session_ttl_days,
            secure_cookies,
            cors_origin,
        })
    }
}

/// Reads `name` from the environment, falling back to `default`, and parses it.
fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

/// Session lifetimes outside 1..=3650 days are rejected so expiry arithmetic cannot overflow.
fn validate_session_ttl(days: i64) -> Result<i64, ConfigError> {
    if (1..=3650).contains(&days) {
        Ok(days)
    } else {
        Err(ConfigError::InvalidValue(
            "SESSION_TTL_DAYS".to_string(),
            format!("{} is not between 1 and 3650", days),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_var_uses_default_when_unset() {
        let port: u16 = parse_var("PARLEY_TEST_UNSET_VARIABLE", "5000").unwrap();
        assert_eq!(port, 5000);
    }

    #[test]
    fn parse_var_reports_the_variable_name() {
        let err = parse_var::<u64>("PARLEY_TEST_UNSET_VARIABLE", "sixty").unwrap_err();
        let ConfigError::InvalidValue(name, _) = err;
        assert_eq!(name, "PARLEY_TEST_UNSET_VARIABLE");
    }

    #[test]
    fn session_ttl_must_be_a_sane_number_of_days() {
        assert_eq!(validate_session_ttl(30).unwrap(), 30);
        assert_eq!(validate_session_ttl(1).unwrap(), 1);
        for days in [0, -1, 3651, i64::MAX, i64::MIN] {
            let ConfigError::InvalidValue(name, _) = validate_session_ttl(days).unwrap_err();
            assert_eq!(name, "SESSION_TTL_DAYS");
        }
    }
}
