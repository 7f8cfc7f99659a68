//! Proxy parser module for turning raw list entries into candidates

use crate::proxy::models::{ProxyCandidate, ProxyType};
use once_cell::sync::Lazy;
use regex::Regex;

static URL_FORMAT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)(https?|socks[45])://([^:/@\s]+):(\d+)/?$").expect("Invalid URL format regex")
});

/// Regex pattern to match IP:PORT patterns in free text
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})\b")
        .expect("Invalid IP:PORT regex")
});

/// Proxy parser for parsing candidates from strings and files
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single proxy line
    ///
    /// Supports formats:
    /// - HOST:PORT
    /// - HOST:PORT:COUNTRY
    /// - scheme://HOST:PORT
    ///
    /// Blank lines, comments and anything without a `:` separator yield `None`.
    pub fn parse_line(line: &str, default_type: ProxyType) -> Option<ProxyCandidate> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        if let Some(candidate) = Self::parse_url_format(line) {
            return Some(candidate);
        }

        Self::parse_colon_format(line, default_type)
    }

    /// Parse URL format proxy (e.g., http://ip:port or socks5://ip:port)
    fn parse_url_format(line: &str) -> Option<ProxyCandidate> {
        let caps = URL_FORMAT_REGEX.captures(line)?;
        let proxy_type = ProxyType::from_scheme(&caps[1])?;
        let port = Self::parse_port(&caps[3])?;
        Self::build(&caps[2], port, proxy_type, None)
    }

    /// Parse host:port or host:port:country format
    fn parse_colon_format(line: &str, default_type: ProxyType) -> Option<ProxyCandidate> {
        let parts: Vec<&str> = line.split(':').collect();

        match parts.as_slice() {
            [host, port] => Self::build(host, Self::parse_port(port)?, default_type, None),
            [host, port, country] => Self::build(
                host,
                Self::parse_port(port)?,
                default_type,
                Self::parse_country(country),
            ),
            _ => None,
        }
    }

    /// Build a candidate from a structured record's fields
    pub fn from_parts(
        host: &str,
        port: &str,
        proxy_type: ProxyType,
        country: Option<&str>,
    ) -> Option<ProxyCandidate> {
        Self::build(
            host.trim(),
            Self::parse_port(port)?,
            proxy_type,
            country.and_then(Self::parse_country),
        )
    }

    fn build(
        host: &str,
        port: u16,
        proxy_type: ProxyType,
        country: Option<String>,
    ) -> Option<ProxyCandidate> {
        if !Self::is_valid_host(host) {
            return None;
        }
        Some(ProxyCandidate::new(host, port, proxy_type).with_claimed_country(country))
    }

    fn parse_port(port: &str) -> Option<u16> {
        match port.trim().parse::<u16>() {
            Ok(0) | Err(_) => None,
            Ok(port) => Some(port),
        }
    }

    /// ISO 3166-1 alpha-2 codes only; anything else is treated as absent
    fn parse_country(country: &str) -> Option<String> {
        let country = country.trim();
        let valid = country.len() == 2
            && country.chars().all(|c| c.is_ascii_alphabetic());
        valid.then(|| country.to_ascii_uppercase())
    }

    fn is_valid_host(host: &str) -> bool {
        !host.is_empty()
            && host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
    }

    /// Parse candidates from a string (multiple lines)
    pub fn parse_string(content: &str, default_type: ProxyType) -> Vec<ProxyCandidate> {
        content
            .lines()
            .filter_map(|line| Self::parse_line(line, default_type))
            .collect()
    }

    /// Scrape `ip:port` pairs out of arbitrary text such as an HTML page
    pub fn extract_with_regex(content: &str) -> Vec<String> {
        IP_PORT_REGEX
            .captures_iter(content)
            .filter_map(|cap| {
                let host = cap.get(1)?.as_str();
                let port = Self::parse_port(cap.get(2)?.as_str())?;

                for part in host.split('.') {
                    let num: u32 = part.parse().ok()?;
                    if num > 255 {
                        return None;
                    }
                }

                Some(format!("{}:{}", host, port))
            })
            .collect()
    }
}
