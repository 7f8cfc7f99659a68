//! Proxy validator
//!
//! A candidate is checked by requesting an IP echo endpoint through it. When a
//! country filter is set, the origin IP is then geolocated. A failed or timed
//! out lookup accepts the candidate with no resolved country; this fallback is
//! applied to every candidate alike.

use crate::config::{HarvestConfig, DEFAULT_CHECK_URL, DEFAULT_GEO_URL};
use crate::proxy::geo::{GeoLocation, GeoLocator, GeoResolver, HttpGeoLocator};
use crate::proxy::models::{GeoStatus, ProxyCandidate, ProxyType, ValidationResult, Verdict};
use crate::Result;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use reqwest::{Client, Proxy as ReqwestProxy};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default timeout for the connectivity check in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default timeout for the geolocation lookup in seconds
const DEFAULT_GEO_TIMEOUT_SECS: u64 = 5;

/// Configuration for the proxy validator
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout for the connectivity check
    pub timeout: Duration,
    /// Timeout for the geolocation lookup
    pub geo_timeout: Duration,
    /// URL that echoes the caller's IP
    pub test_url: String,
    /// Geolocation endpoint template, `{ip}` is substituted
    pub geo_url: String,
    /// Path to MMDB file for offline geolocation (optional)
    pub mmdb_path: Option<String>,
    /// Accept only proxies whose origin resolves to this country code
    pub country: Option<String>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            geo_timeout: Duration::from_secs(DEFAULT_GEO_TIMEOUT_SECS),
            test_url: DEFAULT_CHECK_URL.to_string(),
            geo_url: DEFAULT_GEO_URL.to_string(),
            mmdb_path: None,
            country: None,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the validator settings out of a run configuration
    pub fn from_harvest(config: &HarvestConfig) -> Self {
        Self {
            timeout: config.check_timeout(),
            geo_timeout: config.geo_timeout(),
            test_url: config.check_url.clone(),
            geo_url: config.geo_url.clone(),
            mmdb_path: config
                .mmdb_path
                .as_ref()
                .map(|p| p.display().to_string()),
            country: config.country_filter(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_geo_timeout(mut self, timeout: Duration) -> Self {
        self.geo_timeout = timeout;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn with_geo_url(mut self, url: String) -> Self {
        self.geo_url = url;
        self
    }

    pub fn with_mmdb_path(mut self, path: String) -> Self {
        self.mmdb_path = Some(path);
        self
    }

    pub fn with_country(mut self, country: Option<String>) -> Self {
        self.country = country
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty());
        self
    }
}

/// Response contract of the IP echo endpoint.
///
/// httpbin answers `{"origin": "a.b.c.d"}` (comma separated when proxies add
/// forwarding headers), ipify-style services answer `{"ip": "a.b.c.d"}`.
#[derive(Debug, Deserialize)]
struct OriginResponse {
    #[serde(alias = "ip", alias = "query")]
    origin: String,
}

impl OriginResponse {
    fn first_ip(&self) -> Option<String> {
        self.origin
            .split(',')
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(String::from)
    }
}

/// Something that classifies one candidate. The runner only depends on this.
#[async_trait]
pub trait Validate: Send + Sync {
    async fn validate(&self, candidate: &ProxyCandidate) -> ValidationResult;
}

/// Proxy validator performing the connectivity and geolocation checks
#[derive(Clone)]
pub struct ProxyChecker {
    config: CheckerConfig,
    geo: Option<GeoResolver>,
}

impl ProxyChecker {
    /// Create a new validator with default configuration
    pub fn new() -> Self {
        Self {
            config: CheckerConfig::default(),
            geo: None,
        }
    }

    /// Create a validator with custom configuration.
    ///
    /// A geolocation backend is only set up when a country filter is active;
    /// the MMDB database wins over the HTTP endpoint when both are given.
    pub fn with_config(config: CheckerConfig) -> Result<Self> {
        let geo = match (&config.country, &config.mmdb_path) {
            (None, _) => None,
            (Some(_), Some(path)) => Some(GeoResolver::Mmdb(GeoLocator::from_path(path)?)),
            (Some(_), None) => Some(GeoResolver::Http(HttpGeoLocator::new(
                config.geo_url.clone(),
                config.geo_timeout,
            )?)),
        };

        Ok(Self { config, geo })
    }

    /// Check a single candidate. Never retries.
    pub async fn check_proxy(&self, candidate: &ProxyCandidate) -> ValidationResult {
        let start = Instant::now();

        let client = match self.create_client(candidate) {
            Ok(client) => client,
            Err(e) => {
                return ValidationResult::unreachable(
                    candidate.clone(),
                    start.elapsed(),
                    Verdict::Unreachable(e.to_string()),
                )
            }
        };

        let origin = match tokio::time::timeout(
            self.config.timeout,
            fetch_origin(&client, &self.config.test_url),
        )
        .await
        {
            Ok(Ok(origin)) => origin,
            Ok(Err(OriginError::Status(code))) => {
                return ValidationResult::unreachable(
                    candidate.clone(),
                    start.elapsed(),
                    Verdict::BadStatus(code),
                )
            }
            Ok(Err(OriginError::Timeout)) | Err(_) => {
                return ValidationResult::unreachable(
                    candidate.clone(),
                    start.elapsed(),
                    Verdict::TimedOut,
                )
            }
            Ok(Err(OriginError::Other(e))) => {
                return ValidationResult::unreachable(
                    candidate.clone(),
                    start.elapsed(),
                    Verdict::Unreachable(e),
                )
            }
        };
        let elapsed = start.elapsed();

        let (Some(expected), Some(geo)) = (&self.config.country, &self.geo) else {
            return ValidationResult::reached(
                candidate.clone(),
                elapsed,
                origin,
                None,
                GeoStatus::Skipped,
                Verdict::Accepted,
            );
        };

        let lookup = geo
            .resolve(&origin, self.config.geo_timeout)
            .await
            .and_then(|location| {
                location
                    .country_code
                    .ok_or_else(|| anyhow!("no country recorded for {}", origin))
            });

        match lookup {
            Ok(found) => {
                let verdict = if found.eq_ignore_ascii_case(expected) {
                    Verdict::Accepted
                } else {
                    Verdict::CountryMismatch {
                        expected: expected.clone(),
                        found: found.clone(),
                    }
                };
                ValidationResult::reached(
                    candidate.clone(),
                    elapsed,
                    origin,
                    Some(found),
                    GeoStatus::Resolved,
                    verdict,
                )
            }
            Err(e) => {
                warn!(proxy = %candidate, "geolocation unavailable, accepting: {}", e);
                ValidationResult::reached(
                    candidate.clone(),
                    elapsed,
                    origin,
                    None,
                    GeoStatus::Unavailable(e.to_string()),
                    Verdict::Accepted,
                )
            }
        }
    }

    /// Create a reqwest client routed through the candidate
    fn create_client(&self, candidate: &ProxyCandidate) -> Result<Client> {
        let proxy_url = candidate.url();

        let reqwest_proxy = match candidate.proxy_type {
            ProxyType::Http | ProxyType::Https => ReqwestProxy::http(&proxy_url)?,
            ProxyType::Socks4 | ProxyType::Socks5 => ReqwestProxy::all(&proxy_url)?,
        };

        let client = Client::builder()
            .proxy(reqwest_proxy)
            .timeout(self.config.timeout)
            .build()?;

        Ok(client)
    }
}

impl Default for ProxyChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Validate for ProxyChecker {
    async fn validate(&self, candidate: &ProxyCandidate) -> ValidationResult {
        let result = self.check_proxy(candidate).await;
        debug!(
            proxy = %candidate,
            elapsed_ms = result.elapsed_ms(),
            "verdict: {:?}",
            result.verdict
        );
        result
    }
}

enum OriginError {
    Status(u16),
    Timeout,
    Other(String),
}

impl From<reqwest::Error> for OriginError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            OriginError::Timeout
        } else {
            OriginError::Other(e.to_string())
        }
    }
}

async fn fetch_origin(client: &Client, url: &str) -> std::result::Result<String, OriginError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(OriginError::Status(status.as_u16()));
    }
    let body: OriginResponse = response.json().await?;
    body.first_ip()
        .ok_or_else(|| OriginError::Other("IP echo response carried no address".to_string()))
}

/// Origin IP and location of the direct connection, without any proxy
pub async fn check_direct(
    test_url: &str,
    geo: Option<&GeoResolver>,
    timeout: Duration,
) -> Result<(String, Option<GeoLocation>)> {
    let client = Client::builder().timeout(timeout).build()?;
    let origin = match fetch_origin(&client, test_url).await {
        Ok(origin) => origin,
        Err(OriginError::Status(code)) => bail!("IP echo endpoint returned HTTP {}", code),
        Err(OriginError::Timeout) => bail!("IP echo endpoint timed out"),
        Err(OriginError::Other(e)) => return Err(anyhow!(e)),
    };

    let location = match geo {
        Some(geo) => match geo.resolve(&origin, timeout).await {
            Ok(location) => Some(location),
            Err(e) => {
                warn!("could not determine location of {}: {}", origin, e);
                None
            }
        },
        None => None,
    };

    Ok((origin, location))
}
