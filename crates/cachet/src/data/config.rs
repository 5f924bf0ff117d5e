use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::data::policy::{
    CachePolicy, DEFAULT_BACKOFF, DEFAULT_MAX_ERROR_BODY_BYTES, DEFAULT_MAX_ITEM_BYTES,
    DEFAULT_RETRY_BUDGET, DEFAULT_TIMEOUT_BACKOFF, ErrorPolicy, RetryPolicy,
};
use crate::data::request::{Method, Request};
use crate::error::Result;

pub const DEFAULT_CACHE_EXTENSION: &str = "cache";
pub const DEFAULT_STREAM_BUFFER_BYTES: usize = 32 * 1024;

/// TOML-backed connector settings.
///
/// ```toml
/// [cache]
/// backend = "file"
/// directory = "/var/cache/cachet"
///
/// [request]
/// ttl_ms = 60000
///
/// [retry]
/// budget = 5
/// base_wait_ms = 250
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectorConfig {
    pub cache:   CacheConfig,
    pub digest:  DigestConfig,
    pub stream:  StreamConfig,
    pub request: RequestConfig,
    pub retry:   RetryConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    None,
    File,
    Kv,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub backend:   CacheBackend,
    /// Entry directory for `file`, database directory for `kv`.
    pub directory: Option<PathBuf>,
    pub extension: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend:   CacheBackend::None,
            directory: None,
            extension: DEFAULT_CACHE_EXTENSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DigestConfig {
    /// Database directory for remembered fingerprints.
    pub store: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    #[default]
    Raw,
    Buffered,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    pub mode:         StreamMode,
    pub buffer_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            mode:         StreamMode::Raw,
            buffer_bytes: DEFAULT_STREAM_BUFFER_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestConfig {
    pub ttl_ms:               u64,
    pub max_item_bytes:       u64,
    pub read_timeout_ms:      u64,
    pub connect_timeout_ms:   u64,
    pub capture_error_body:   bool,
    pub max_error_body_bytes: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            ttl_ms:               0,
            max_item_bytes:       DEFAULT_MAX_ITEM_BYTES,
            read_timeout_ms:      10_000,
            connect_timeout_ms:   10_000,
            capture_error_body:   false,
            max_error_body_bytes: DEFAULT_MAX_ERROR_BODY_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub budget:          u32,
    pub backoff:         f64,
    pub timeout_backoff: f64,
    pub base_wait_ms:    u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            budget:          DEFAULT_RETRY_BUDGET,
            backoff:         DEFAULT_BACKOFF,
            timeout_backoff: DEFAULT_TIMEOUT_BACKOFF,
            base_wait_ms:    1000,
        }
    }
}

impl ConnectorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> { Ok(toml::from_str(text)?) }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy::new(Duration::from_millis(self.request.ttl_ms))
            .with_max_item_bytes(self.request.max_item_bytes)
    }

    /// Validated retry policy.
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::new(self.retry.budget)
            .with_backoff(self.retry.backoff)?
            .with_timeout_backoff(self.retry.timeout_backoff)?
            .with_base_wait(Duration::from_millis(self.retry.base_wait_ms))
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy::new()
            .capture_error_body(self.request.capture_error_body)
            .max_error_body_bytes(self.request.max_error_body_bytes)
    }

    /// A request carrying the configured timeouts and policies.
    pub fn request(&self, method: Method, url: &str) -> Result<Request> {
        Ok(Request::new(method, url)?
            .with_read_timeout(Duration::from_millis(self.request.read_timeout_ms))
            .with_connect_timeout(Duration::from_millis(self.request.connect_timeout_ms))
            .with_cache_policy(self.cache_policy())
            .with_retry_policy(self.retry_policy()?)
            .with_error_policy(self.error_policy()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ConnectorConfig::from_toml_str("").unwrap();
        assert_eq!(config, ConnectorConfig::default());
        assert_eq!(config.cache.extension, "cache");
        assert_eq!(config.stream.buffer_bytes, 32 * 1024);
        assert!(!config.cache_policy().is_enabled());
    }

    #[test]
    fn test_full_config() {
        let config = ConnectorConfig::from_toml_str(
            r#"
            [cache]
            backend = "file"
            directory = "/tmp/cachet"
            extension = "bin"

            [stream]
            mode = "buffered"

            [request]
            ttl_ms = 60000
            read_timeout_ms = 2500
            capture_error_body = true

            [retry]
            budget = 5
            backoff = 1.5
            base_wait_ms = 200
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.backend, CacheBackend::File);
        assert_eq!(config.cache.directory.as_deref(), Some(Path::new("/tmp/cachet")));
        assert_eq!(config.stream.mode, StreamMode::Buffered);

        let request = config.request(Method::Get, "http://localhost/").unwrap();
        assert_eq!(request.read_timeout(), Duration::from_millis(2500));
        assert_eq!(request.connect_timeout(), Duration::from_secs(10));
        assert!(request.cache_policy().is_enabled());
        assert!(request.error_policy().captures_error_body());
        assert_eq!(request.retry_policy().retry_budget(), 5);
        assert_eq!(request.retry_policy().next_backoff_ms(1, 200), 300);
    }

    #[test]
    fn test_invalid_retry_rejected() {
        let config = ConnectorConfig::from_toml_str("[retry]\nbackoff = 0.5\n").unwrap();
        assert!(matches!(config.retry_policy(), Err(Error::InvalidPolicy(_))));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = ConnectorConfig::from_toml_str("[cache]\nttl = 5\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
