//! # Runtime Configuration
//!
//! Configuration for the request engine, streaming channel, orchestrators and
//! caches. Values are layered with the `config` crate:
//!
//! 1. Built-in defaults ([`RuntimeConfig::default`])
//! 2. An optional TOML file (`PREPPER_CLIENT_CONFIG`, `./prepper-client.toml`,
//!    `./config/prepper-client.toml`, or `<config dir>/prepper/client.toml`)
//! 3. Environment variables of the form `PREPPER_CLIENT__<SECTION>__<KEY>`,
//!    e.g. `PREPPER_CLIENT__API__MAX_RETRIES=5`
//!
//! Durations are stored in milliseconds and exposed as [`Duration`] through
//! accessor methods.
//!
//! ```rust
//! use prepper_client::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::default();
//! assert_eq!(config.api.max_retries, 3);
//! assert_eq!(config.channel_url().unwrap(), "ws://localhost:8080/ws");
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::constants::{endpoints, frameworks};
use crate::error::{ChannelError, ChannelResult, ConfigResult, ConfigurationError};

const ENV_PREFIX: &str = "PREPPER_CLIENT";
const CONFIG_PATH_ENV: &str = "PREPPER_CLIENT_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub api: ApiConfig,
    pub streaming: StreamingConfig,
    pub analysis: AnalysisConfig,
    pub upload: UploadConfig,
    pub cache: CacheConfig,
    pub health: HealthConfig,
}

/// Request engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Backend base URL (e.g. "http://localhost:8080")
    pub base_url: String,
    /// Per-attempt timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Additional attempts after the first for retryable failures
    pub max_retries: u32,
    /// Base backoff; attempt `n` waits `retry_delay_ms * n`
    pub retry_delay_ms: u64,
    pub slow_request_threshold_ms: u64,
}

/// Streaming channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub enabled: bool,
    /// Explicit channel URL; derived from `api.base_url` when absent
    pub url: Option<String>,
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
}

/// Analysis orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub poll_interval_ms: u64,
    /// Hard ceiling on a session; polling gives up after
    /// `analysis_timeout_ms / poll_interval_ms` attempts
    pub analysis_timeout_ms: u64,
    /// Keep polling even while push updates are available
    pub poll_with_streaming: bool,
    pub max_proposal_id_length: usize,
    pub default_frameworks: Vec<String>,
}

/// Upload validation limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub accepted_types: Vec<String>,
    pub max_file_size: u64,
    pub min_file_size: u64,
    pub max_filename_length: usize,
}

/// Response cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_ms: u64,
    /// Directory for the durable tier; memory-only when absent
    pub durable_dir: Option<PathBuf>,
    /// Prefix isolating this cache's durable entries
    pub namespace: String,
}

/// Availability gate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub cache_ttl_ms: u64,
    pub wait_check_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            streaming: StreamingConfig::default(),
            analysis: AnalysisConfig::default(),
            upload: UploadConfig::default(),
            cache: CacheConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            slow_request_threshold_ms: crate::constants::DEFAULT_SLOW_REQUEST_THRESHOLD_MS,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            reconnect_interval_ms: 5_000,
            max_reconnect_attempts: 10,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            analysis_timeout_ms: 600_000,
            poll_with_streaming: true,
            max_proposal_id_length: 128,
            default_frameworks: frameworks::SUPPORTED.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            accepted_types: vec!["application/pdf".to_string()],
            max_file_size: 100 * 1024 * 1024,
            min_file_size: 1024,
            max_filename_length: 255,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 10 * 60 * 1_000,
            durable_dir: None,
            namespace: "prepper-client".to_string(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 30_000,
            wait_check_interval_ms: 2_000,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn slow_request_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_request_threshold_ms)
    }
}

impl StreamingConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl AnalysisConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }

    /// Number of polls before a session is declared timed out (at least one).
    pub fn max_poll_attempts(&self) -> u32 {
        let attempts = self.analysis_timeout_ms / self.poll_interval_ms.max(1);
        attempts.clamp(1, u64::from(u32::MAX)) as u32
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

impl HealthConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn wait_check_interval(&self) -> Duration {
        Duration::from_millis(self.wait_check_interval_ms)
    }
}

impl RuntimeConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load() -> ConfigResult<Self> {
        let file = Self::find_config_file();
        if let Some(path) = &file {
            debug!(path = %path.display(), "Loading client configuration file");
        }
        let config = Self::build(file.as_deref(), true)?;
        debug!(base_url = %config.api.base_url, "Loaded client configuration");
        Ok(config)
    }

    /// Load configuration from a specific file layered over the defaults.
    ///
    /// Environment variables are not consulted.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        Self::build(Some(path), false)
    }

    fn build(file: Option<&Path>, with_env: bool) -> ConfigResult<Self> {
        let defaults = config::Config::try_from(&Self::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        if with_env {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("analysis.default_frameworks")
                    .with_list_parse_key("upload.accepted_types"),
            );
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn find_config_file() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
            return Some(PathBuf::from(explicit));
        }

        let mut candidates = vec![
            PathBuf::from("./prepper-client.toml"),
            PathBuf::from("./config/prepper-client.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("prepper").join("client.toml"));
        }

        candidates.into_iter().find(|path| path.is_file())
    }

    /// Reject values that would make the runtime misbehave.
    pub fn validate(&self) -> ConfigResult<()> {
        let base = Url::parse(&self.api.base_url)
            .map_err(|e| ConfigurationError::invalid("api.base_url", e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigurationError::invalid(
                "api.base_url",
                format!("unsupported scheme {}", base.scheme()),
            ));
        }

        let non_zero = [
            ("api.request_timeout_ms", self.api.request_timeout_ms),
            ("streaming.reconnect_interval_ms", self.streaming.reconnect_interval_ms),
            ("analysis.poll_interval_ms", self.analysis.poll_interval_ms),
            ("analysis.analysis_timeout_ms", self.analysis.analysis_timeout_ms),
            ("health.wait_check_interval_ms", self.health.wait_check_interval_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigurationError::invalid(field, "must be greater than zero"));
            }
        }

        if self.upload.min_file_size > self.upload.max_file_size {
            return Err(ConfigurationError::invalid(
                "upload.min_file_size",
                "must not exceed upload.max_file_size",
            ));
        }
        if self.upload.accepted_types.is_empty() {
            return Err(ConfigurationError::invalid(
                "upload.accepted_types",
                "at least one MIME type is required",
            ));
        }

        Ok(())
    }

    /// Streaming channel URL: the explicit override, or the API base URL with
    /// its scheme switched to ws/wss and the channel path appended.
    pub fn channel_url(&self) -> ChannelResult<String> {
        if let Some(url) = &self.streaming.url {
            return Ok(url.clone());
        }

        let invalid = |reason: String| ChannelError::InvalidUrl {
            url: self.api.base_url.clone(),
            reason,
        };
        let mut url = Url::parse(&self.api.base_url).map_err(|e| invalid(e.to_string()))?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(invalid(format!("unsupported scheme {other}"))),
        };
        url.set_scheme(scheme)
            .map_err(|()| invalid("scheme change rejected".to_string()))?;

        let path = format!(
            "{}{}",
            url.path().trim_end_matches('/'),
            endpoints::CHANNEL_PATH
        );
        url.set_path(&path);
        Ok(url.to_string())
    }
}
