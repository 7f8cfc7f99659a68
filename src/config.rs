//! Run configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `PROXY_HARVEST_*` environment variables. The CLI applies its flags on top.

use crate::error::HarvestError;
use crate::proxy::ProxyType;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default URL that echoes the caller's IP as JSON
pub const DEFAULT_CHECK_URL: &str = "http://httpbin.org/ip";

/// Default geolocation endpoint; `{ip}` is replaced with the origin IP
pub const DEFAULT_GEO_URL: &str = "http://ip-api.com/json/{ip}";

const ENV_PREFIX: &str = "PROXY_HARVEST";

/// How a source's payload should be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Sniff JSON vs. plain text from the body
    #[default]
    Auto,
    Text,
    Json,
}

/// A remote proxy list
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub format: SourceFormat,
    #[serde(default)]
    pub proxy_type: ProxyType,
}

impl SourceConfig {
    pub fn new(name: &str, url: &str, format: SourceFormat, proxy_type: ProxyType) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            format,
            proxy_type,
        }
    }
}

/// Retry policy for fetching source lists. Validation never retries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 1_000,
            factor: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait before retry number `retry` (0-based), capped at `max_delay_ms`
    pub fn backoff(&self, retry: u32) -> Duration {
        let mut delay = self.base_delay_ms as f64 * self.factor.powi(retry as i32);
        if !delay.is_finite() || delay > self.max_delay_ms as f64 {
            delay = self.max_delay_ms as f64;
        }
        Duration::from_millis(delay.max(0.0) as u64)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Full configuration for a harvest run
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub sources: Vec<SourceConfig>,
    pub check_url: String,
    pub geo_url: String,
    /// Offline MaxMind database; preferred over `geo_url` when set
    pub mmdb_path: Option<PathBuf>,
    pub check_timeout_secs: u64,
    pub geo_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub workers: usize,
    pub max_proxies: usize,
    pub max_candidates: Option<usize>,
    pub country: Option<String>,
    pub output: PathBuf,
    pub retry: RetryPolicy,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            check_url: DEFAULT_CHECK_URL.to_string(),
            geo_url: DEFAULT_GEO_URL.to_string(),
            mmdb_path: None,
            check_timeout_secs: 10,
            geo_timeout_secs: 5,
            fetch_timeout_secs: 30,
            workers: 10,
            max_proxies: 5,
            max_candidates: None,
            country: None,
            output: PathBuf::from("proxies.txt"),
            retry: RetryPolicy::default(),
        }
    }
}

impl HarvestConfig {
    /// Load configuration from an optional TOML file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, HarvestError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn geo_timeout(&self) -> Duration {
        Duration::from_secs(self.geo_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Country filter, upper-cased
    pub fn country_filter(&self) -> Option<String> {
        self.country
            .as_deref()
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
    }
}

/// Public list sources used when nothing else is configured
pub fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::new(
            "proxy-list.download",
            "https://www.proxy-list.download/api/v1/get?type=http",
            SourceFormat::Text,
            ProxyType::Http,
        ),
        SourceConfig::new(
            "proxyscrape",
            "https://api.proxyscrape.com/v2/?request=get&protocol=http&timeout=10000&format=json",
            SourceFormat::Json,
            ProxyType::Http,
        ),
        SourceConfig::new(
            "geonode",
            "https://proxylist.geonode.com/api/proxy-list?limit=500&page=1&sort_by=lastChecked&sort_type=desc",
            SourceFormat::Json,
            ProxyType::Http,
        ),
    ]
}
