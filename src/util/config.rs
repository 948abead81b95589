// Process configuration, read once from the environment (and `.env`) at startup.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use log::warn;
use thiserror::Error;

use crate::models::LEVEL_COUNT;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("BACKEND_MODEL must be `openai` or `ollama`, got `{0}`")]
    UnknownBackend(String),

    #[error("invalid value for `{key}`: {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// Which provider handles prompt forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    Hosted,
    #[serde(rename = "ollama")]
    Local,
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::Hosted),
            "ollama" => Ok(ProviderKind::Local),
            other => Err(ConfigError::UnknownBackend(other.to_owned())),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Hosted => write!(f, "openai"),
            ProviderKind::Local => write!(f, "ollama"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostedConfig {
    /// `None` when the key is unset or still the `.env.example` placeholder.
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalConfig {
    pub url: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub backend_model: ProviderKind,
    pub openai: HostedConfig,
    pub ollama: LocalConfig,
    pub database_url: String,
    pub bind_address: String,
    pub allowed_origins: Vec<String>,
    pub cookie_token: Option<String>,
    pub admin_token: Option<String>,
    pub production: bool,
    pub level_passwords: [Option<String>; LEVEL_COUNT],
}

const API_KEY_PLACEHOLDER: &str = "your_openai_api_key_here";

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4-turbo";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434/api/generate";
pub const DEFAULT_OLLAMA_MODEL: &str = "mistral";
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_DATABASE_URL: &str = "jailbreak.db";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";
pub const DEFAULT_FRONTEND_ORIGINS: &str = "http://localhost:8501,http://127.0.0.1:8501";

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let backend_model = match get("BACKEND_MODEL") {
            Some(raw) => raw.parse::<ProviderKind>()?,
            None => ProviderKind::Local,
        };

        let api_key = get("OPENAI_API_KEY").filter(|key| key != API_KEY_PLACEHOLDER);

        let openai = HostedConfig {
            api_key,
            model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_owned()),
            base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_owned())
                .trim_end_matches('/')
                .to_owned(),
            timeout: parse_timeout("OPENAI_TIMEOUT", get("OPENAI_TIMEOUT"))?,
        };

        let ollama = LocalConfig {
            url: get("OLLAMA_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_owned()),
            model: get("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_owned()),
            timeout: parse_timeout("OLLAMA_TIMEOUT", get("OLLAMA_TIMEOUT"))?,
        };

        let allowed_origins = get("FRONTEND_ORIGINS")
            .unwrap_or_else(|| DEFAULT_FRONTEND_ORIGINS.to_owned())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_owned)
            .collect();

        let production = !matches!(get("MODE").as_deref(), Some("dev"));

        Ok(Self {
            backend_model,
            openai,
            ollama,
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned()),
            bind_address: get("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_owned()),
            allowed_origins,
            cookie_token: get("COOKIE_TOKEN"),
            admin_token: get("ADMIN_TOKEN"),
            production,
            level_passwords: [
                get("LEVEL1_PASSWORD"),
                get("LEVEL2_PASSWORD"),
                get("LEVEL3_PASSWORD"),
                get("LEVEL4_PASSWORD"),
            ],
        })
    }

    /// Logs the non-fatal gaps in the configuration.
    pub fn warn_on_gaps(&self) {
        if self.backend_model == ProviderKind::Hosted && self.openai.api_key.is_none() {
            warn!("OPENAI_API_KEY not found in environment variables; hosted calls will fail");
        }
        if self.cookie_token.is_none() {
            warn!("COOKIE_TOKEN not set; sessions will not survive a restart");
        }
        if !self.production {
            warn!("Under development mode.");
        }
    }
}

fn parse_timeout(key: &'static str, raw: Option<String>) -> Result<Duration, ConfigError> {
    match raw {
        None => Ok(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::InvalidValue {
                key,
                message: e.to_string(),
            }),
    }
}
