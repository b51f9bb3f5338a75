/*!
Configuration management for the kernel primitives
*/

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Pub/sub topic used for findings when an external channel is configured
pub const FINDINGS_CHANNEL: &str = "slavkokernel:observability";

/// Local storage key holding the caller's access token
pub const ACCESS_TOKEN_KEY: &str = "slavko_jwt";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Retry executor settings
    pub retry: RetryConfig,
    /// Lazy loader settings
    pub loader: LoaderConfig,
    /// Findings broadcaster settings
    pub broadcaster: BroadcasterConfig,
    /// Access token storage settings
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    /// Backoff unit; attempt n sleeps base * 2^n
    pub backoff_base_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Total load attempts
    pub max_attempts: u32,
    /// Linear backoff unit in milliseconds
    pub delay_ms: u64,
    /// Lowercase substrings marking a transient load failure
    pub transient_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    /// Topic name on the external channel
    pub channel: String,
    /// Connection URL; overridden by the `url_env` variable when set
    pub url: Option<String>,
    /// Environment variable consulted for the connection URL
    pub url_env: String,
    /// How long to wait for the external channel at startup
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Path to the local storage file
    pub storage_path: Option<PathBuf>,
    /// Key under which the access token is stored
    pub token_key: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_ms: 5000,
            backoff_base_ms: 1000,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            transient_patterns: vec![
                "failed to fetch dynamically imported module".to_string(),
                "loading chunk".to_string(),
                "loading css chunk".to_string(),
            ],
        }
    }
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            channel: FINDINGS_CHANNEL.to_string(),
            url: None,
            url_env: "REDIS_URL".to_string(),
            connect_timeout_ms: 2000,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            storage_path: None,
            token_key: ACCESS_TOKEN_KEY.to_string(),
        }
    }
}

impl KernelConfig {
    /// Load a config file; sections missing from the file keep their defaults
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

impl RetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl LoaderConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl BroadcasterConfig {
    /// Resolve the external channel URL from the process environment
    pub fn resolve_url(&self) -> Option<String> {
        self.resolve_url_with(|name| std::env::var(name).ok())
    }

    /// Resolve the external channel URL using a custom variable lookup
    pub fn resolve_url_with<F>(&self, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |url: &String| !url.trim().is_empty();
        lookup(&self.url_env)
            .filter(present)
            .or_else(|| self.url.clone().filter(present))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl IdentityConfig {
    /// Storage file location, falling back to the platform data directory
    pub fn resolved_storage_path(&self) -> PathBuf {
        if let Some(ref path) = self.storage_path {
            return path.clone();
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("slavko")
            .join("local_storage.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_documented_values() {
        let config = KernelConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.timeout(), Duration::from_millis(5000));
        assert_eq!(config.loader.max_attempts, 3);
        assert_eq!(config.broadcaster.channel, "slavkokernel:observability");
        assert_eq!(config.identity.token_key, "slavko_jwt");
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config = KernelConfig::from_toml(
            r#"
            [retry]
            max_retries = 5

            [broadcaster]
            url = "redis://cache:6379"
            "#,
        )
        .unwrap();

        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.timeout_ms, 5000);
        assert_eq!(config.broadcaster.url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.broadcaster.url_env, "REDIS_URL");
        assert_eq!(config.loader.transient_patterns.len(), 3);
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let err = KernelConfig::from_toml("[retry\nmax_retries = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_file_url() {
        let config = BroadcasterConfig {
            url: Some("redis://from-file".to_string()),
            ..BroadcasterConfig::default()
        };

        let from_env = config.resolve_url_with(|name| {
            (name == "REDIS_URL").then(|| "redis://from-env".to_string())
        });
        assert_eq!(from_env.as_deref(), Some("redis://from-env"));

        let from_file = config.resolve_url_with(|_| None);
        assert_eq!(from_file.as_deref(), Some("redis://from-file"));
    }

    #[test]
    fn blank_environment_value_defers_to_file_url() {
        let config = BroadcasterConfig {
            url: Some("redis://from-file".to_string()),
            ..BroadcasterConfig::default()
        };

        assert_eq!(
            config.resolve_url_with(|_| Some(String::new())).as_deref(),
            Some("redis://from-file")
        );
        assert_eq!(
            config.resolve_url_with(|_| Some("   ".to_string())).as_deref(),
            Some("redis://from-file")
        );
    }

    #[test]
    fn blank_url_selects_fallback() {
        let config = BroadcasterConfig::default();
        assert_eq!(config.resolve_url_with(|_| Some("  ".to_string())), None);
        assert_eq!(config.resolve_url_with(|_| None), None);
    }
}
