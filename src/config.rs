//! Server configuration
//!
//! Read from the environment (optionally seeded by a `.env` file).
//! The first command line argument overrides the bind address.

use std::time::Duration;

use crate::error::AppError;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Default wait before a fallback session is offered
pub const DEFAULT_MATCH_TIMEOUT: Duration = Duration::from_secs(8);

/// Default room domain used for degraded room URLs
pub const DEFAULT_DAILY_DOMAIN: &str = "voicematch";

/// Default lifetime of a provisioned room
pub const DEFAULT_ROOM_EXPIRY: Duration = Duration::from_secs(2 * 60 * 60);

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub match_timeout: Duration,
    /// Room provider API key; `None` means degraded rooms only
    pub daily_api_key: Option<String>,
    pub daily_domain: String,
    pub room_expiry: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_ADDR.to_string(),
            match_timeout: DEFAULT_MATCH_TIMEOUT,
            daily_api_key: None,
            daily_domain: DEFAULT_DAILY_DOMAIN.to_string(),
            room_expiry: DEFAULT_ROOM_EXPIRY,
        }
    }
}

impl Config {
    /// Load `.env`, then read the process environment and arguments
    pub fn from_env() -> Result<Self, AppError> {
        // A missing .env file is fine
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok(), std::env::args().nth(1))
    }

    /// Build a config from an arbitrary variable source
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        addr_arg: Option<String>,
    ) -> Result<Self, AppError> {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            bind_addr: addr_arg
                .or_else(|| non_empty("VOICE_MATCH_ADDR"))
                .unwrap_or(defaults.bind_addr),
            match_timeout: match non_empty("MATCH_TIMEOUT_SECS") {
                Some(raw) => parse_secs("MATCH_TIMEOUT_SECS", &raw)?,
                None => defaults.match_timeout,
            },
            daily_api_key: non_empty("DAILY_API_KEY"),
            daily_domain: non_empty("DAILY_DOMAIN").unwrap_or(defaults.daily_domain),
            room_expiry: match non_empty("ROOM_EXPIRY_SECS") {
                Some(raw) => parse_secs("ROOM_EXPIRY_SECS", &raw)?,
                None => defaults.room_expiry,
            },
        })
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration, AppError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(AppError::Config {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        }),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(AppError::Config {
            key: key.to_string(),
            message: format!("'{}' is not a number of seconds: {}", raw, e),
        }),
    }
}
