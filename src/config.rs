//! Process configuration, read from the environment (and `.env` if present).

use std::str::FromStr;
use std::time::Duration;

use crate::error::{ChatError, ChatResult};
use crate::ws::SessionSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// A sqlx sqlite url, or `memory` for the in-process store.
    pub database_url: String,
    pub jwt_secret: String,
    pub session_inactivity_minutes: i64,
    pub session: SessionSettings,
}

impl Config {
    pub fn from_env() -> ChatResult<Self> {
        // a missing .env is fine
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ChatResult<Self> {
        let defaults = SessionSettings::default();
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ChatError::Config("JWT_SECRET must be set".to_owned()))?;

        let session = SessionSettings {
            queue_capacity: number(&lookup, "OUTBOUND_QUEUE_CAPACITY", defaults.queue_capacity)?,
            ping_interval: secs(&lookup, "PING_INTERVAL_SECS", defaults.ping_interval)?,
            pong_wait: secs(&lookup, "PONG_WAIT_SECS", defaults.pong_wait)?,
            write_wait: secs(&lookup, "WRITE_WAIT_SECS", defaults.write_wait)?,
            max_message_bytes: number(&lookup, "MAX_MESSAGE_BYTES", defaults.max_message_bytes)?,
        };
        if session.ping_interval >= session.pong_wait {
            return Err(ChatError::Config(
                "PING_INTERVAL_SECS must be less than PONG_WAIT_SECS".to_owned(),
            ));
        }
        if session.queue_capacity == 0 {
            return Err(ChatError::Config("OUTBOUND_QUEUE_CAPACITY must be positive".to_owned()));
        }

        Ok(Self {
            bind_addr: var("BIND_ADDR", "0.0.0.0:8080"),
            database_url: var("DATABASE_URL", "sqlite://roomcast.db?mode=rwc"),
            jwt_secret,
            session_inactivity_minutes: number(&lookup, "SESSION_INACTIVITY_MINUTES", 5)?,
            session,
        })
    }
}

fn number<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> ChatResult<T> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ChatError::Config(format!("{key}={raw} is not a valid number"))),
    }
}

fn secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> ChatResult<Duration> {
    number(lookup, key, default.as_secs()).map(Duration::from_secs)
}
