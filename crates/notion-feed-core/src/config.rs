//! YAML configuration for the post feed
//!
//! ```yaml
//! notion:
//!   database_id: 0123456789abcdef0123456789abcdef
//! api:
//!   timeout_secs: 20
//! posts:
//!   date_property: date
//! ```

use crate::id::parse_page_id;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://www.notion.so/api/v3";

/// Error type for configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete feed configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub notion: NotionSource,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub posts: PostsConfig,
}

/// Where the posts live
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotionSource {
    /// Id (or URL) of the database holding the posts
    #[serde(default)]
    pub database_id: Option<String>,
    /// Legacy: id (or URL) of the page embedding the database
    #[serde(default)]
    pub page_id: Option<String>,
}

impl NotionSource {
    /// Root id to fetch. `database_id` wins over the legacy `page_id`.
    pub fn root_id(&self) -> Option<&str> {
        [&self.database_id, &self.page_id]
            .into_iter()
            .filter_map(|id| id.as_deref().map(str::trim))
            .find(|id| !id.is_empty())
    }
}

/// Store client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the `api/v3` endpoints
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries for connection failures and 5xx responses
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base retry delay in milliseconds, multiplied by the attempt number
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Maximum response body size in bytes
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
    /// Maximum member pages requested per collection view
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,
    /// `token_v2` cookie for private workspaces
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_response_bytes: default_max_response_bytes(),
            query_limit: default_query_limit(),
            auth_token: None,
            user_agent: default_user_agent(),
        }
    }
}

/// Post list settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostsConfig {
    /// Name of the date column used for ordering
    #[serde(default = "default_date_property")]
    pub date_property: String,
    /// Member pages extracted concurrently (1 = sequential)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for PostsConfig {
    fn default() -> Self {
        Self {
            date_property: default_date_property(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_max_response_bytes() -> usize {
    20 * 1024 * 1024 // 20MB
}

fn default_query_limit() -> usize {
    999
}

fn default_user_agent() -> String {
    concat!("notion-feed/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_date_property() -> String {
    "date".to_string()
}

fn default_max_concurrent() -> usize {
    1
}

impl FeedConfig {
    /// Configuration for a database id with every other setting defaulted
    pub fn for_database(database_id: impl Into<String>) -> Self {
        Self {
            notion: NotionSource {
                database_id: Some(database_id.into()),
                page_id: None,
            },
            ..Self::default()
        }
    }

    /// Parse a YAML config file from a path
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(content.as_str())
    }

    /// Parse a YAML config from a string
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: FeedConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate settings. A missing root id is not an error here: it may be
    /// supplied later (command line) and the feed treats it as "nothing to show".
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("notion.database_id", &self.notion.database_id),
            ("notion.page_id", &self.notion.page_id),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                if parse_page_id(value).is_none() {
                    return Err(ConfigError::Validation(format!(
                        "{field} does not contain a Notion id: {value}"
                    )));
                }
            }
        }

        let base = url::Url::parse(&self.api.base_url).map_err(|e| {
            ConfigError::Validation(format!("api.base_url is not a valid URL: {e}"))
        })?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(ConfigError::Validation(
                "api.base_url must start with http:// or https://".into(),
            ));
        }
        if self.api.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "api.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.api.max_response_bytes == 0 {
            return Err(ConfigError::Validation(
                "api.max_response_bytes must be greater than 0".into(),
            ));
        }
        if self.api.query_limit == 0 {
            return Err(ConfigError::Validation(
                "api.query_limit must be greater than 0".into(),
            ));
        }
        if self.posts.date_property.trim().is_empty() {
            return Err(ConfigError::Validation(
                "posts.date_property cannot be empty".into(),
            ));
        }
        if self.posts.max_concurrent == 0 {
            return Err(ConfigError::Validation(
                "posts.max_concurrent must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}
