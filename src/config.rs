use std::str::FromStr;
use thiserror::Error;

use crate::leaderboard::OverallStrategy;
use crate::review::DEFAULT_REVIEW_MODEL;
use crate::score::{DEFAULT_BOARD_LIMIT, MAX_BOARD_LIMIT};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is invalid: {1}")]
    InvalidValue(&'static str, String),
}

/// Server settings read from the environment at start-up
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_address: String,
    /// Absent: everything is kept in memory
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub session_expiration_days: i64,
    pub leaderboard_limit: usize,
    pub overall_board: OverallStrategy,
    pub store_max_attempts: u32,
    pub openai_api_key: Option<String>,
    pub review_model: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            database_url: None,
            jwt_secret: "your-secret-key-change-in-production".to_string(),
            session_expiration_days: 365,
            leaderboard_limit: DEFAULT_BOARD_LIMIT,
            overall_board: OverallStrategy::default(),
            store_max_attempts: 5,
            openai_api_key: None,
            review_model: DEFAULT_REVIEW_MODEL.to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any variable source; unset or blank values keep
    /// their defaults, malformed ones are rejected.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let leaderboard_limit = parse_or(
            get("LEADERBOARD_LIMIT"),
            "LEADERBOARD_LIMIT",
            defaults.leaderboard_limit,
        )?;
        if leaderboard_limit == 0 || leaderboard_limit > MAX_BOARD_LIMIT {
            return Err(ConfigError::InvalidValue(
                "LEADERBOARD_LIMIT",
                format!("must be between 1 and {MAX_BOARD_LIMIT}"),
            ));
        }
        let store_max_attempts = parse_or(
            get("STORE_MAX_ATTEMPTS"),
            "STORE_MAX_ATTEMPTS",
            defaults.store_max_attempts,
        )?;
        if store_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "STORE_MAX_ATTEMPTS",
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            bind_address: get("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            database_url: get("DATABASE_URL"),
            jwt_secret: get("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            session_expiration_days: parse_or(
                get("SESSION_EXPIRATION_DAYS"),
                "SESSION_EXPIRATION_DAYS",
                defaults.session_expiration_days,
            )?,
            leaderboard_limit,
            overall_board: parse_or(
                get("OVERALL_BOARD"),
                "OVERALL_BOARD",
                defaults.overall_board,
            )?,
            store_max_attempts,
            openai_api_key: get("OPENAI_API_KEY"),
            review_model: get("REVIEW_MODEL").unwrap_or(defaults.review_model),
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(key, format!("{raw:?}: {e}"))),
        None => Ok(default),
    }
}
