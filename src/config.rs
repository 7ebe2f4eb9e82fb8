use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use teloxide::types::ChatId;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// A required environment variable is absent or empty.
    Missing(&'static str),
    /// A numeric variable could not be parsed.
    InvalidNumber { name: &'static str, value: String },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(name) => {
                write!(f, "missing required environment variable {name}, check your .env file")
            }
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be an integer, got '{value}'")
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

pub struct Config {
    pub telegram_bot_token: String,
    pub gemini_api_key: String,
    pub alpha_vantage_api_key: String,
    /// Base directory for `temp/`, `logs/` and the lock file.
    pub data_dir: PathBuf,
    /// Operator chat that receives forwarded log lines.
    pub log_chat_id: Option<ChatId>,
    pub single_instance: bool,
    pub lock_file: PathBuf,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let optional = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let telegram_bot_token = required("TELEGRAM_BOT_TOKEN")?;
        let gemini_api_key = required("GEMINI_API_KEY")?;
        let alpha_vantage_api_key = required("ALPHA_VANTAGE_API_KEY")?;

        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_format = Regex::new(r"^\d+:\S+$")
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        if !token_format.is_match(&telegram_bot_token) {
            return Err(ConfigError::Validation(
                "TELEGRAM_BOT_TOKEN appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }

        let data_dir = optional("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let log_chat_id = match optional("LOG_CHAT_ID") {
            Some(value) => Some(ChatId(value.parse::<i64>().map_err(|_| {
                ConfigError::InvalidNumber { name: "LOG_CHAT_ID", value: value.clone() }
            })?)),
            None => None,
        };

        let single_instance = match optional("SINGLE_INSTANCE").as_deref() {
            None => true,
            Some(v) => !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"),
        };

        let lock_file = optional("LOCK_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("cryptogem.lock"));

        Ok(Self {
            telegram_bot_token,
            gemini_api_key,
            alpha_vantage_api_key,
            data_dir,
            log_chat_id,
            single_instance,
            lock_file,
        })
    }

    /// Where downloaded photos are staged.
    pub fn temp_dir(&self) -> PathBuf {
        self.data_dir.join("temp")
    }
}
