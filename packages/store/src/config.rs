//! # Client configuration: `cms.toml`
//!
//! Defines the TOML file the admin client reads at startup (filename:
//! [`CmsConfig::filename`] = `"cms.toml"`). It names the backend origin, the static
//! site origin used for read-only snapshots, and the timing knobs of the request
//! pipeline.
//!
//! ## Structure
//!
//! ```toml
//! [api]
//! base = "http://localhost:3000"   # empty or non-http(s) = no backend
//!
//! [queue]
//! delay_ms = 150
//!
//! [retry]
//! base_delay_ms = 2000
//! max_retries = 3
//!
//! [detector]
//! timeout_ms = 1200
//!
//! [site]
//! base = "https://example.github.io/magazine/"
//! cache_ttl_ms = 1500
//!
//! [github]
//! enabled = false
//! api = "https://api.github.com"
//! ```
//!
//! ## Types
//!
//! | Struct | Purpose |
//! |--------|---------|
//! | [`CmsConfig`] | Top-level config with builder helpers and TOML (de)serialisation. |
//! | [`ApiConfig`] | Backend origin. A runtime override saved in the local store takes precedence. |
//! | [`QueueConfig`] | Inter-request delay of the request queue, default **150 ms**. |
//! | [`RetryConfig`] | Rate-limit backoff: base delay **2000 ms**, **3** retries. |
//! | [`DetectorConfig`] | Health probe timeout, default **1200 ms**. |
//! | [`SiteConfig`] | Static snapshot origin, cache TTL **1500 ms**, and repo-relative paths of the published documents. |
//! | [`GithubConfig`] | Whether GitHub publishing is offered, and the API origin. |
//!
//! Every section is `#[serde(default)]`, so an empty file is the default configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CmsConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub github: GithubConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub base: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_delay")]
    pub delay_ms: u64,
}

fn default_queue_delay() -> u64 {
    150
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_queue_delay(),
        }
    }
}

impl QueueConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_base")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_retry_base() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_retry_base(),
            max_retries: default_max_retries(),
        }
    }
}

impl RetryConfig {
    /// `base * 2^attempt`, attempt counted from zero.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_probe_timeout")]
    pub timeout_ms: u64,
}

fn default_probe_timeout() -> u64 {
    1200
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_probe_timeout(),
        }
    }
}

impl DetectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Origin the static snapshot is fetched from. Empty means "no snapshot".
    #[serde(default)]
    pub base: String,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_ms: u64,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_cover_path")]
    pub cover_path: String,
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,
}

fn default_cache_ttl() -> u64 {
    1500
}

fn default_db_path() -> String {
    "data/db.json".to_string()
}

fn default_cover_path() -> String {
    "data/cover.json".to_string()
}

fn default_uploads_dir() -> String {
    "assets/uploads".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base: String::new(),
            cache_ttl_ms: default_cache_ttl(),
            db_path: default_db_path(),
            cover_path: default_cover_path(),
            uploads_dir: default_uploads_dir(),
        }
    }
}

impl SiteConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_github_api")]
    pub api: String,
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api: default_github_api(),
        }
    }
}

impl CmsConfig {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api: ApiConfig {
                base: api_base.into(),
            },
            ..Default::default()
        }
    }

    pub fn with_site_base(mut self, base: impl Into<String>) -> Self {
        self.site.base = base.into();
        self
    }

    pub fn with_queue_delay_ms(mut self, ms: u64) -> Self {
        self.queue.delay_ms = ms;
        self
    }

    pub fn with_retry(mut self, base_delay_ms: u64, max_retries: u32) -> Self {
        self.retry = RetryConfig {
            base_delay_ms,
            max_retries,
        };
        self
    }

    pub fn with_github(mut self, enabled: bool) -> Self {
        self.github.enabled = enabled;
        self
    }

    pub fn with_github_api(mut self, api: impl Into<String>) -> Self {
        self.github.api = api.into();
        self
    }

    /// The well-known filename for the config file.
    pub fn filename() -> &'static str {
        "cms.toml"
    }

    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
