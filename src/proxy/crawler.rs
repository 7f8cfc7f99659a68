//! Proxy list sources
//!
//! This module provides functionality for:
//! - Fetching raw proxy lists from HTTP endpoints, local files or memory
//! - Decoding plain text and JSON list payloads into raw entries
//! - Retrying a flaky source according to a [`RetryPolicy`]

use crate::config::{RetryPolicy, SourceConfig, SourceFormat};
use crate::error::HarvestError;
use crate::proxy::models::{ProxyCandidate, ProxyType};
use crate::proxy::parser::ProxyParser;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = concat!("proxy-harvest/", env!("CARGO_PKG_VERSION"));

/// One unparsed entry as delivered by a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEntry {
    /// A free-form line such as `1.2.3.4:8080` or `socks5://1.2.3.4:1080`
    Line(String),
    /// A structured record from a JSON list
    Record {
        ip: String,
        port: String,
        country: Option<String>,
        proxy_type: ProxyType,
    },
}

impl RawEntry {
    /// Turn the entry into a candidate, or `None` if it is malformed
    pub fn to_candidate(&self, default_type: ProxyType) -> Option<ProxyCandidate> {
        match self {
            RawEntry::Line(line) => ProxyParser::parse_line(line, default_type),
            RawEntry::Record {
                ip,
                port,
                country,
                proxy_type,
            } => ProxyParser::from_parts(ip, port, *proxy_type, country.as_deref()),
        }
    }
}

/// A list-providing source of proxy candidates.
///
/// An empty `Ok` is a successful fetch with nothing in it; failures are
/// reported as `Err` so the pool builder can tell them apart.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Human readable name used in logs
    fn name(&self) -> &str;

    /// Scheme assumed for entries that do not name one
    fn proxy_type(&self) -> ProxyType {
        ProxyType::Http
    }

    async fn fetch(&self) -> Result<Vec<RawEntry>, HarvestError>;
}

/// Proxy list served over HTTP
pub struct HttpSource {
    config: SourceConfig,
    client: Client,
    retry: RetryPolicy,
}

impl HttpSource {
    /// Create a source with its own client
    pub fn new(config: SourceConfig, timeout: Duration, retry: RetryPolicy) -> Result<Self, HarvestError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self::with_client(config, client, retry))
    }

    /// Create a source sharing an existing client
    pub fn with_client(config: SourceConfig, client: Client, retry: RetryPolicy) -> Self {
        Self {
            config,
            client,
            retry,
        }
    }

    /// Build a shared client suitable for list fetching
    pub fn default_client(timeout: Option<Duration>) -> Result<Client, HarvestError> {
        Ok(Client::builder()
            .timeout(timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)))
            .user_agent(DEFAULT_USER_AGENT)
            .build()?)
    }

    async fn fetch_once(&self) -> Result<Vec<RawEntry>, HarvestError> {
        let response = self
            .client
            .get(&self.config.url)
            .send()
            .await
            .map_err(|e| HarvestError::source_failed(&self.config.name, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::source_failed(
                &self.config.name,
                format!("HTTP status: {}", status),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| HarvestError::source_failed(&self.config.name, e))?;

        decode_payload(&body, self.config.format, self.config.proxy_type)
            .map_err(|e| HarvestError::source_failed(&self.config.name, e))
    }
}

#[async_trait]
impl SourceFetcher for HttpSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn proxy_type(&self) -> ProxyType {
        self.config.proxy_type
    }

    async fn fetch(&self) -> Result<Vec<RawEntry>, HarvestError> {
        let attempts = self.retry.attempts();
        let mut attempt = 0;
        loop {
            match self.fetch_once().await {
                Ok(entries) => return Ok(entries),
                Err(e) if attempt + 1 < attempts => {
                    let delay = self.retry.backoff(attempt);
                    debug!(
                        source = %self.config.name,
                        attempt = attempt + 1,
                        "fetch failed, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Proxy list stored in a local file (for example a previous run's artifact)
pub struct FileSource {
    name: String,
    path: PathBuf,
    proxy_type: ProxyType,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, proxy_type: ProxyType) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            path,
            proxy_type,
        }
    }
}

#[async_trait]
impl SourceFetcher for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        self.proxy_type
    }

    async fn fetch(&self) -> Result<Vec<RawEntry>, HarvestError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| HarvestError::source_failed(&self.name, e))?;
        Ok(text_entries(&content))
    }
}

/// Fixed in-memory list, e.g. proxies given on the command line
pub struct StaticSource {
    name: String,
    entries: Vec<String>,
    proxy_type: ProxyType,
}

impl StaticSource {
    pub fn new<I, S>(name: &str, entries: I, proxy_type: ProxyType) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            entries: entries.into_iter().map(Into::into).collect(),
            proxy_type,
        }
    }
}

#[async_trait]
impl SourceFetcher for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        self.proxy_type
    }

    async fn fetch(&self) -> Result<Vec<RawEntry>, HarvestError> {
        Ok(self.entries.iter().cloned().map(RawEntry::Line).collect())
    }
}

/// Port given either as a JSON number or as a string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortField {
    Number(u64),
    Text(String),
}

impl PortField {
    fn into_string(self) -> String {
        match self {
            PortField::Number(n) => n.to_string(),
            PortField::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProxyRecord {
    #[serde(alias = "host", alias = "address")]
    ip: String,
    port: PortField,
    #[serde(default, alias = "country_code", alias = "countryCode")]
    country: Option<String>,
    #[serde(default, alias = "protocol")]
    protocols: Option<Protocols>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Protocols {
    One(String),
    Many(Vec<String>),
}

impl Protocols {
    fn first(&self) -> Option<ProxyType> {
        match self {
            Protocols::One(p) => ProxyType::from_scheme(p),
            Protocols::Many(list) => list.iter().find_map(|p| ProxyType::from_scheme(p)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonEntry {
    Record(ProxyRecord),
    Line(String),
    Other(serde_json::Value),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonPayload {
    List(Vec<JsonEntry>),
    Data { data: Vec<JsonEntry> },
    Proxies { proxies: Vec<JsonEntry> },
}

/// Decode a list payload into raw entries.
///
/// JSON bodies may be a bare array of strings or records, or an object with
/// a `data` or `proxies` array. Plain text is split into lines; if no line
/// parses, `ip:port` pairs are scraped out of the body instead.
pub fn decode_payload(
    body: &str,
    format: SourceFormat,
    proxy_type: ProxyType,
) -> Result<Vec<RawEntry>, String> {
    let trimmed = body.trim_start();
    let is_json = match format {
        SourceFormat::Json => true,
        SourceFormat::Text => false,
        SourceFormat::Auto => trimmed.starts_with('[') || trimmed.starts_with('{'),
    };

    if !is_json {
        return Ok(text_entries(body));
    }

    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let payload: JsonPayload =
        serde_json::from_str(trimmed).map_err(|e| format!("malformed JSON payload: {}", e))?;
    let entries = match payload {
        JsonPayload::List(entries) => entries,
        JsonPayload::Data { data } => data,
        JsonPayload::Proxies { proxies } => proxies,
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            JsonEntry::Record(record) => Some(RawEntry::Record {
                proxy_type: record
                    .protocols
                    .as_ref()
                    .and_then(Protocols::first)
                    .unwrap_or(proxy_type),
                ip: record.ip,
                port: record.port.into_string(),
                country: record.country,
            }),
            JsonEntry::Line(line) => Some(RawEntry::Line(line)),
            JsonEntry::Other(value) => {
                debug!("skipping unrecognized JSON entry: {}", value);
                None
            }
        })
        .collect())
}

fn text_entries(body: &str) -> Vec<RawEntry> {
    let lines: Vec<&str> = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();

    let parseable = lines
        .iter()
        .any(|line| ProxyParser::parse_line(line, ProxyType::Http).is_some());

    if parseable || lines.is_empty() {
        return lines.into_iter().map(|l| RawEntry::Line(l.to_string())).collect();
    }

    let scraped = ProxyParser::extract_with_regex(body);
    if scraped.is_empty() {
        warn!("payload contained no recognizable proxy entries");
        return lines.into_iter().map(|l| RawEntry::Line(l.to_string())).collect();
    }
    scraped.into_iter().map(RawEntry::Line).collect()
}
