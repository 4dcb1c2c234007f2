use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_PREFIX: &str = "!";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DISCORD_TOKEN environment variable is required")]
    MissingToken,
}

/// Process-level settings of the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    pub token: String,
    /// Directory holding one YAML file per record collection
    pub data_dir: PathBuf,
    pub prefix: String,
}

impl BotConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `DISCORD_TOKEN`
    ///
    /// Optional:
    /// - `DATA_DIR` (default `data`)
    /// - `COMMAND_PREFIX` (default `!`)
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingToken`] if no token is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingToken`] if the token is missing or blank.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let token = non_empty("DISCORD_TOKEN").ok_or(ConfigError::MissingToken)?;
        let data_dir = non_empty("DATA_DIR").map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from);
        let prefix = non_empty("COMMAND_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string());

        Ok(Self {
            token,
            data_dir,
            prefix,
        })
    }
}
