//! Process configuration, assembled once at startup.

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Credentials for the hosted messaging service.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub base_url: Url,
    pub app_id: String,
    pub api_token: SecretString,
}

/// Credentials for the hosted image service.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub base_url: Url,
    pub api_key: SecretString,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub chat: ChatConfig,
    pub media: MediaConfig,
}

impl Config {
    /// Reads the full configuration from the environment. This is the
    /// only place the process touches environment variables; everything
    /// downstream receives explicit values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = optional("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = match optional("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                reason: format!("not a port number: {raw}"),
            })?,
            None => 3001,
        };

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: require("DATABASE_URL")?,
            },
            chat: ChatConfig {
                base_url: parse_url("CHAT_API_URL", &require("CHAT_API_URL")?)?,
                app_id: require("CHAT_APP_ID")?,
                api_token: SecretString::from(require("CHAT_API_TOKEN")?),
            },
            media: MediaConfig {
                base_url: parse_url("MEDIA_API_URL", &require("MEDIA_API_URL")?)?,
                api_key: SecretString::from(require("MEDIA_API_KEY")?),
            },
        })
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

fn optional(name: &'static str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}
