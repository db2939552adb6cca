//! Client configuration
//!
//! Read from a JSON file, then optionally overridden from the environment.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{ClientError, Result};

pub const ENV_API_URL: &str = "GENERATION_API_URL";
pub const ENV_API_KEY: &str = "GENERATION_API_KEY";
pub const ENV_TIMEOUT_SECS: &str = "GENERATION_TIMEOUT_SECS";

/// Connection settings for the generation service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Service root; method names are appended as path segments
    pub base_url: String,
    /// Sent as a bearer token when present
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout_secs: u64,
    pub upload_path: String,
    pub preprocess_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8188/api".to_string(),
            api_key: None,
            timeout_secs: 120,
            upload_path: "upload".to_string(),
            preprocess_path: "preprocess".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Load configuration from a JSON file; a missing file yields defaults
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No client config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `GENERATION_API_URL`, `GENERATION_API_KEY` and
    /// `GENERATION_TIMEOUT_SECS` from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            self.base_url = url;
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT_SECS) {
            self.timeout_secs = timeout.trim().parse().map_err(|_| {
                ClientError::Config(format!("{} must be a number of seconds, got '{}'", ENV_TIMEOUT_SECS, timeout))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::Config("baseUrl must not be empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(ClientError::Config("timeoutSecs must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[tokio::test]
    async fn test_load_partial_file() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(&path, r#"{"baseUrl": "https://gen.example/v1", "apiKey": "secret"}"#).unwrap();

        let config = ClientConfig::load(&path).await.unwrap();
        assert_eq!(config.base_url, "https://gen.example/v1");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.timeout_secs, 120);
        assert_eq!(config.upload_path, "upload");
    }

    #[tokio::test]
    async fn test_load_missing_and_invalid() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let missing = ClientConfig::load(&dir.path().join("none.json")).await.unwrap();
        assert_eq!(missing, ClientConfig::default());

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(ClientConfig::load(&path).await, Err(ClientError::Parse(_))));

        std::fs::write(&path, r#"{"timeoutSecs": 0}"#).unwrap();
        assert!(matches!(ClientConfig::load(&path).await, Err(ClientError::Config(_))));
    }

    #[test]
    fn test_overrides() {
        init_logging();
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_API_URL, "https://override.example"),
            (ENV_API_KEY, ""),
            (ENV_TIMEOUT_SECS, " 30 "),
        ]);
        let config = ClientConfig::default()
            .with_api_key("from-file")
            .with_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.base_url, "https://override.example");
        assert_eq!(config.api_key, None);
        assert_eq!(config.timeout_secs, 30);

        let err = ClientConfig::default()
            .with_overrides(|k| (k == ENV_TIMEOUT_SECS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
