//! Geolocation of origin IPs
//!
//! Two backends share one [`GeoResolver`]: an HTTP endpoint in the style of
//! ip-api.com, and an offline MaxMind MMDB database.

use crate::Result;
use anyhow::{anyhow, bail, Context};
use maxminddb::{geoip2, Reader};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Geographic location information for an IP address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GeoLocation {
    /// ISO 3166-1 alpha-2 country code (e.g., "US", "CN")
    pub country_code: Option<String>,
    /// Country name in English
    pub country_name: Option<String>,
    pub region_name: Option<String>,
    /// City name in English
    pub city_name: Option<String>,
}

impl std::fmt::Display for GeoLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = [
            self.city_name.clone(),
            self.region_name.clone(),
            self.country_name.clone().or_else(|| self.country_code.clone()),
        ]
        .into_iter()
        .flatten()
        .collect();

        if parts.is_empty() {
            write!(f, "Unknown Location")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// GeoLocator for looking up IP addresses in MMDB databases
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Create a new GeoLocator from an MMDB file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path)
            .with_context(|| format!("opening MMDB database {}", path.display()))?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Look up the geolocation for an IP address string
    pub fn lookup(&self, ip_str: &str) -> Result<GeoLocation> {
        let ip: IpAddr = ip_str.parse()?;
        self.lookup_ip(ip)
    }

    /// Look up the geolocation for an IpAddr
    pub fn lookup_ip(&self, ip: IpAddr) -> Result<GeoLocation> {
        let lookup_result = self.reader.lookup(ip)?;

        let city: Option<geoip2::City> = lookup_result.decode()?;

        let Some(city) = city else {
            return Ok(GeoLocation::default());
        };

        Ok(GeoLocation {
            country_code: city.country.iso_code.map(String::from),
            country_name: city.country.names.english.map(String::from),
            region_name: None,
            city_name: city.city.names.english.map(String::from),
        })
    }
}

impl Clone for GeoLocator {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}

/// Response contract of the HTTP geolocation endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    region_name: Option<String>,
    #[serde(default)]
    city: Option<String>,
}

/// Looks up IPs against an HTTP endpoint; `{ip}` in the URL is substituted
#[derive(Clone)]
pub struct HttpGeoLocator {
    client: Client,
    url_template: String,
}

impl HttpGeoLocator {
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self> {
        // Lookups describe the origin IP, so they always go out directly.
        let client = Client::builder().timeout(timeout).no_proxy().build()?;
        Ok(Self {
            client,
            url_template: url_template.into(),
        })
    }

    pub fn url_for(&self, ip: &str) -> String {
        if self.url_template.contains("{ip}") {
            self.url_template.replace("{ip}", ip)
        } else {
            format!("{}/{}", self.url_template.trim_end_matches('/'), ip)
        }
    }

    pub async fn lookup(&self, ip: &str) -> Result<GeoLocation> {
        let response = self.client.get(self.url_for(ip)).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("geolocation endpoint returned {}", status);
        }

        let body: IpApiResponse = response.json().await?;
        if body.status.as_deref().is_some_and(|s| s != "success") {
            return Err(anyhow!(
                "geolocation lookup failed: {}",
                body.message.unwrap_or_else(|| "unknown reason".to_string())
            ));
        }

        let location = GeoLocation {
            country_code: body.country_code.map(|c| c.to_ascii_uppercase()),
            country_name: body.country,
            region_name: body.region_name,
            city_name: body.city,
        };
        if location.country_code.is_none() {
            bail!("geolocation response carried no country code");
        }
        Ok(location)
    }
}

/// The configured geolocation backend
#[derive(Clone)]
pub enum GeoResolver {
    Http(HttpGeoLocator),
    Mmdb(GeoLocator),
}

impl GeoResolver {
    /// Resolve `ip`, bounded by `timeout`
    pub async fn resolve(&self, ip: &str, timeout: Duration) -> Result<GeoLocation> {
        match self {
            GeoResolver::Http(locator) => tokio::time::timeout(timeout, locator.lookup(ip))
                .await
                .map_err(|_| anyhow!("geolocation lookup timed out after {:?}", timeout))?,
            GeoResolver::Mmdb(locator) => locator.lookup(ip),
        }
    }
}
