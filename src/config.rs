use std::time::Duration;

use thiserror::Error;

use crate::spybot::FORWARD_DELAY;

pub const TOKEN_VAR: &str = "SPYBOT_TOKEN";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const FORWARD_DELAY_VAR: &str = "SPYBOT_FORWARD_DELAY_MS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "Environment variable 'SPYBOT_TOKEN' is missing or empty. \
        Use 'export SPYBOT_TOKEN=<TELEGRAM BOT TOKEN>' to specify the bot token given to you by BotFather."
    )]
    MissingToken,
    #[error("Environment variable 'SPYBOT_FORWARD_DELAY_MS' must be a number of milliseconds, got {0:?}")]
    InvalidForwardDelay(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    /// SQLite database to keep masters in, in-memory if unset
    pub database_url: Option<String>,
    pub forward_delay: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let token = lookup(TOKEN_VAR)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let database_url = lookup(DATABASE_URL_VAR).filter(|url| !url.trim().is_empty());

        let forward_delay = match lookup(FORWARD_DELAY_VAR) {
            Some(ms) => ms
                .trim()
                .parse()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidForwardDelay(ms))?,
            None => FORWARD_DELAY,
        };

        Ok(Self {
            token,
            database_url,
            forward_delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn token_is_required() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::MissingToken);
        assert_eq!(
            load(&[(TOKEN_VAR, "   ")]).unwrap_err(),
            ConfigError::MissingToken
        );
    }

    #[test]
    fn defaults() {
        let config = load(&[(TOKEN_VAR, " 123:abc\n")]).unwrap();
        assert_eq!(config.token, "123:abc");
        assert_eq!(config.database_url, None);
        assert_eq!(config.forward_delay, FORWARD_DELAY);
    }

    #[test]
    fn optional_settings() {
        let config = load(&[
            (TOKEN_VAR, "123:abc"),
            (DATABASE_URL_VAR, "sqlite://spybot.db"),
            (FORWARD_DELAY_VAR, "250"),
        ])
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("sqlite://spybot.db"));
        assert_eq!(config.forward_delay, Duration::from_millis(250));

        let err = load(&[(TOKEN_VAR, "123:abc"), (FORWARD_DELAY_VAR, "soon")]).unwrap_err();
        assert_eq!(err, ConfigError::InvalidForwardDelay("soon".to_string()));
    }
}
