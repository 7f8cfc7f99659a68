//! Proxy data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Proxy type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyType {
    /// Parse a scheme or protocol name (`http`, `SOCKS5`, ...)
    pub fn from_scheme(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Some(ProxyType::Http),
            "https" => Some(ProxyType::Https),
            "socks4" => Some(ProxyType::Socks4),
            "socks5" => Some(ProxyType::Socks5),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Http => write!(f, "http"),
            ProxyType::Https => write!(f, "https"),
            ProxyType::Socks4 => write!(f, "socks4"),
            ProxyType::Socks5 => write!(f, "socks5"),
        }
    }
}

/// An unvalidated proxy endpoint harvested from a list source.
///
/// Identity is the `host:port` pair; the claimed country and scheme are
/// metadata carried along for filtering and for building the proxy URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCandidate {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub proxy_type: ProxyType,
    /// Country code the source claims for this proxy, upper-cased
    pub claimed_country: Option<String>,
}

impl ProxyCandidate {
    /// Create a new candidate without geography metadata
    pub fn new(host: impl Into<String>, port: u16, proxy_type: ProxyType) -> Self {
        Self {
            host: host.into(),
            port,
            proxy_type,
            claimed_country: None,
        }
    }

    /// Attach the country claimed by the source
    pub fn with_claimed_country(mut self, country: Option<String>) -> Self {
        self.claimed_country = country
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty());
        self
    }

    /// Get the proxy URL string
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.proxy_type, self.host, self.port)
    }

    /// The dedup key, `host:port`
    pub fn key(&self) -> String {
        format!("{}:{}", self.host.to_ascii_lowercase(), self.port)
    }

    /// The line written to the persisted artifact.
    ///
    /// Plain HTTP proxies are written as `host:port`, every other scheme as
    /// `scheme://host:port` so a reload restores it.
    pub fn to_entry(&self) -> String {
        match self.proxy_type {
            ProxyType::Http => format!("{}:{}", self.host, self.port),
            _ => self.url(),
        }
    }
}

impl fmt::Display for ProxyCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// Outcome of the optional geolocation step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum GeoStatus {
    /// No country filter was configured, nothing was looked up
    Skipped,
    /// The lookup answered with a country
    Resolved,
    /// The lookup failed or timed out; the candidate was accepted optimistically
    Unavailable(String),
}

/// Terminal classification of one validated candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "detail", rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Unreachable(String),
    TimedOut,
    BadStatus(u16),
    CountryMismatch { expected: String, found: String },
}

/// Result of validating one candidate. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub candidate: ProxyCandidate,
    pub reachable: bool,
    pub observed_origin_ip: Option<String>,
    pub resolved_country: Option<String>,
    pub elapsed: Duration,
    pub verdict: Verdict,
    pub geo: GeoStatus,
    pub checked_at: DateTime<Utc>,
}

impl ValidationResult {
    /// The candidate could not be used at all
    pub fn unreachable(candidate: ProxyCandidate, elapsed: Duration, verdict: Verdict) -> Self {
        Self {
            candidate,
            reachable: false,
            observed_origin_ip: None,
            resolved_country: None,
            elapsed,
            verdict,
            geo: GeoStatus::Skipped,
            checked_at: Utc::now(),
        }
    }

    /// The candidate answered through the check endpoint
    pub fn reached(
        candidate: ProxyCandidate,
        elapsed: Duration,
        origin_ip: String,
        resolved_country: Option<String>,
        geo: GeoStatus,
        verdict: Verdict,
    ) -> Self {
        Self {
            candidate,
            reachable: true,
            observed_origin_ip: Some(origin_ip),
            resolved_country,
            elapsed,
            verdict,
            geo,
            checked_at: Utc::now(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.reachable && matches!(self.verdict, Verdict::Accepted)
    }

    /// Response time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }
}

/// Ordered set of accepted candidates; each `host:port` appears at most once.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProxyPool {
    entries: Vec<ProxyCandidate>,
    #[serde(skip)]
    seen: HashSet<String>,
}

impl ProxyPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate; returns `false` when its `host:port` is already present
    pub fn push(&mut self, candidate: ProxyCandidate) -> bool {
        if !self.seen.insert(candidate.key()) {
            return false;
        }
        self.entries.push(candidate);
        true
    }

    pub fn contains(&self, candidate: &ProxyCandidate) -> bool {
        self.seen.contains(&candidate.key())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProxyCandidate> {
        self.entries.iter()
    }

    pub fn into_vec(self) -> Vec<ProxyCandidate> {
        self.entries
    }
}

impl FromIterator<ProxyCandidate> for ProxyPool {
    fn from_iter<I: IntoIterator<Item = ProxyCandidate>>(iter: I) -> Self {
        let mut pool = ProxyPool::new();
        for candidate in iter {
            pool.push(candidate);
        }
        pool
    }
}

impl<'a> IntoIterator for &'a ProxyPool {
    type Item = &'a ProxyCandidate;
    type IntoIter = std::slice::Iter<'a, ProxyCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
