//! Runtime configuration from environment variables

use crate::runtime::TrackerSettings;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{var} has an invalid value {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Everything `main` needs to start the bot and the organizer API
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram_token: String,
    pub db_path: PathBuf,
    pub api_port: u16,
    /// The organizer API only runs when a token is configured
    pub admin_api_token: Option<String>,
    pub authorized_broadcast_ids: Vec<i64>,
    pub images_dir: PathBuf,
    pub broadcast_delay: Duration,
    /// `None` disables idle eviction
    pub conversation_ttl: Option<Duration>,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; `from_env` uses the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let telegram_token = var("TELEGRAM_BOT_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;

        let db_path = var("BOT_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".event-reservation-bot/bot.db")
            },
            PathBuf::from,
        );

        let api_port = parse_or("API_PORT", var("API_PORT"), 3000)?;
        let delay_ms: u64 = parse_or("BROADCAST_DELAY_MS", var("BROADCAST_DELAY_MS"), 100)?;
        let ttl_secs: u64 = parse_or("CONVERSATION_TTL_SECS", var("CONVERSATION_TTL_SECS"), 1800)?;

        let authorized_broadcast_ids = match var("AUTHORIZED_BROADCAST_IDS") {
            Some(raw) => parse_id_list(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            telegram_token,
            db_path,
            api_port,
            admin_api_token: var("ADMIN_API_TOKEN"),
            authorized_broadcast_ids,
            images_dir: var("BROADCAST_IMAGES_DIR").map_or_else(|| PathBuf::from("images"), PathBuf::from),
            broadcast_delay: Duration::from_millis(delay_ms),
            conversation_ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
        })
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            broadcast_delay: self.broadcast_delay,
            conversation_ttl: self.conversation_ttl,
        }
    }
}

fn parse_or<T: FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var: name,
            value: raw,
        }),
    }
}

/// Comma-separated Telegram user ids; blank entries are skipped
fn parse_id_list(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse().map_err(|_| ConfigError::Invalid {
                var: "AUTHORIZED_BROADCAST_IDS",
                value: id.to_string(),
            })
        })
        .collect()
}
