//! Configuration for mockswitch.
//!
//! Defines where the mock catalog lives, where mocked requests are sent, and
//! the initial mocking policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockSwitchConfig {
    /// Catalog service settings
    pub catalog: CatalogConfig,

    /// Base URL of the mock server requests are redirected to
    pub mock_server_url: String,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl MockSwitchConfig {
    /// Create a configuration with default settings.
    pub fn new(
        collection_id: impl Into<String>,
        access_key: impl Into<String>,
        mock_server_url: impl Into<String>,
    ) -> Self {
        Self {
            catalog: CatalogConfig {
                base_url: default_catalog_url(),
                access_key: access_key.into(),
                collection_id: collection_id.into(),
                timeout_ms: default_timeout_ms(),
            },
            mock_server_url: mock_server_url.into(),
            settings: GlobalSettings::default(),
        }
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.catalog
            .validate()
            .map_err(|e| anyhow::anyhow!("catalog: {}", e))?;

        if self.mock_server_url.is_empty() {
            anyhow::bail!("mock_server_url cannot be empty");
        }
        if self.mock_server_url.ends_with('/') {
            anyhow::bail!("mock_server_url must not end with '/'");
        }
        validate_http_url(&self.mock_server_url)
            .map_err(|e| anyhow::anyhow!("mock_server_url: {}", e))?;
        Ok(())
    }
}

/// Catalog service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    /// Base URL of the catalog service
    #[serde(default = "default_catalog_url")]
    pub base_url: String,

    /// Access key sent as `X-API-Key`
    #[serde(default)]
    pub access_key: String,

    /// Collection holding the mocks
    pub collection_id: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl CatalogConfig {
    /// Validate the catalog settings.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.collection_id.is_empty() {
            anyhow::bail!("collection_id cannot be empty");
        }
        if self.timeout_ms == 0 {
            anyhow::bail!("timeout_ms must be greater than zero");
        }
        validate_http_url(&self.base_url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_catalog_url() -> String {
    "https://api.getpostman.com".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn validate_http_url(value: &str) -> anyhow::Result<()> {
    let url = url::Url::parse(value).map_err(|e| anyhow::anyhow!("invalid url {}: {}", value, e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => anyhow::bail!("unsupported scheme {}", other),
    }
}

/// Mocking policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockState {
    /// Enabled mocks are used when matched, real network otherwise
    #[default]
    Enabled,
    /// No mock is ever applied
    Disabled,
    /// Unmatched requests fail instead of reaching the network
    MocksOnly,
}

impl fmt::Display for MockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MockState::Enabled => "enabled",
            MockState::Disabled => "disabled",
            MockState::MocksOnly => "mocks_only",
        };
        f.write_str(name)
    }
}

impl FromStr for MockState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "enabled" => Ok(MockState::Enabled),
            "disabled" => Ok(MockState::Disabled),
            "mocks_only" => Ok(MockState::MocksOnly),
            other => Err(format!(
                "unknown mock state '{}' (expected enabled, disabled or mocks_only)",
                other
            )),
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Initial mocking policy
    #[serde(default)]
    pub mock_state: MockState,

    /// Delay the mock server should apply to mocked responses (ms)
    #[serde(default)]
    pub response_delay_ms: u64,

    /// Log requests redirected to a mock
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log requests with no enabled mock
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

fn default_true() -> bool {
    true
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            mock_state: MockState::Enabled,
            response_delay_ms: 0,
            log_matches: true,
            log_unmatched: true,
        }
    }
}
