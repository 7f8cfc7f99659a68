//! Candidate pool builder
//!
//! Pulls raw entries from every configured source, parses them, and returns
//! a deduplicated candidate list. A failing source is logged and skipped; only
//! when every source fails does the build fail.

use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::proxy::crawler::{HttpSource, SourceFetcher};
use crate::proxy::models::ProxyCandidate;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Result of fetching a single source
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source: String,
    /// Candidates parsed from this source, before cross-source dedup
    pub parsed: usize,
    /// Entries that could not be parsed
    pub malformed: usize,
    pub error: Option<String>,
}

impl SourceReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Candidates plus per-source bookkeeping
#[derive(Debug, Clone, Default)]
pub struct PoolBuild {
    pub candidates: Vec<ProxyCandidate>,
    pub sources: Vec<SourceReport>,
    /// Dropped because their claimed country differs from the filter
    pub filtered_by_country: usize,
}

/// Builds the candidate pool from a set of sources
pub struct PoolBuilder {
    sources: Vec<Box<dyn SourceFetcher>>,
    country: Option<String>,
    max_candidates: Option<usize>,
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            country: None,
            max_candidates: None,
        }
    }

    /// Builder with one HTTP source per configured list
    pub fn from_config(config: &HarvestConfig) -> Result<Self, HarvestError> {
        let client = HttpSource::default_client(Some(config.fetch_timeout()))?;
        let mut builder = Self::new()
            .with_country(config.country_filter())
            .with_max_candidates(config.max_candidates);
        for source in &config.sources {
            builder = builder.with_source(HttpSource::with_client(
                source.clone(),
                client.clone(),
                config.retry.clone(),
            ));
        }
        Ok(builder)
    }

    pub fn with_source<S: SourceFetcher + 'static>(mut self, source: S) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Drop candidates whose source claims a different country.
    /// Candidates without a claim are kept.
    pub fn with_country(mut self, country: Option<String>) -> Self {
        self.country = country
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty());
        self
    }

    /// Keep only the first `max` unique candidates
    pub fn with_max_candidates(mut self, max: Option<usize>) -> Self {
        self.max_candidates = max;
        self
    }

    /// Fetch every source in order and merge the results.
    ///
    /// Returns `AllSourcesFailed` only if no source succeeded. Sources that
    /// succeed with nothing in them make an empty, successful build.
    pub async fn build(&self) -> Result<PoolBuild, HarvestError> {
        if self.sources.is_empty() {
            return Err(HarvestError::NoSources);
        }

        let mut build = PoolBuild::default();
        let mut seen = HashSet::new();

        for source in &self.sources {
            info!(source = source.name(), "fetching proxy list");
            let entries = match source.fetch().await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(source = source.name(), "skipping source: {}", e);
                    build.sources.push(SourceReport {
                        source: source.name().to_string(),
                        parsed: 0,
                        malformed: 0,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };

            let mut report = SourceReport {
                source: source.name().to_string(),
                parsed: 0,
                malformed: 0,
                error: None,
            };

            for entry in &entries {
                let Some(candidate) = entry.to_candidate(source.proxy_type()) else {
                    debug!(source = source.name(), "discarding malformed entry {:?}", entry);
                    report.malformed += 1;
                    continue;
                };
                report.parsed += 1;

                if let (Some(wanted), Some(claimed)) = (&self.country, &candidate.claimed_country) {
                    if wanted != claimed {
                        build.filtered_by_country += 1;
                        continue;
                    }
                }

                if seen.insert(candidate.key()) {
                    build.candidates.push(candidate);
                }
            }

            info!(
                source = source.name(),
                parsed = report.parsed,
                malformed = report.malformed,
                "fetched proxy list"
            );
            build.sources.push(report);
        }

        let attempted = build.sources.len();
        if build.sources.iter().all(|s| !s.is_success()) {
            return Err(HarvestError::AllSourcesFailed { attempted });
        }

        if let Some(max) = self.max_candidates {
            build.candidates.truncate(max);
        }

        info!(
            unique = build.candidates.len(),
            filtered_by_country = build.filtered_by_country,
            "candidate pool ready"
        );
        Ok(build)
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::crawler::{RawEntry, StaticSource};
    use crate::proxy::models::ProxyType;
    use async_trait::async_trait;

    struct FailingSource(&'static str);

    #[async_trait]
    impl SourceFetcher for FailingSource {
        fn name(&self) -> &str {
            self.0
        }

        async fn fetch(&self) -> Result<Vec<RawEntry>, HarvestError> {
            Err(HarvestError::source_failed(self.0, "connection refused"))
        }
    }

    fn keys(build: &PoolBuild) -> Vec<String> {
        build.candidates.iter().map(ProxyCandidate::key).collect()
    }

    #[tokio::test]
    async fn test_dedup_and_malformed_filtering() {
        let builder = PoolBuilder::new().with_source(StaticSource::new(
            "list",
            ["1.2.3.4:8080", "bad-entry", "1.2.3.4:8080", "5.6.7.8:3128"],
            ProxyType::Http,
        ));

        let build = builder.build().await.unwrap();
        assert_eq!(keys(&build), vec!["1.2.3.4:8080", "5.6.7.8:3128"]);
        assert_eq!(build.sources[0].malformed, 1);
        assert_eq!(build.sources[0].parsed, 3);
    }

    #[tokio::test]
    async fn test_entries_without_colon_are_malformed() {
        let builder = PoolBuilder::new().with_source(StaticSource::new(
            "table",
            ["Total 300", "1.2.3.4 8080", "5.6.7.8:3128"],
            ProxyType::Http,
        ));

        let build = builder.build().await.unwrap();
        assert_eq!(keys(&build), vec!["5.6.7.8:3128"]);
        assert_eq!(build.sources[0].malformed, 2);
        assert_eq!(build.sources[0].parsed, 1);
    }

    #[tokio::test]
    async fn test_dedup_across_sources() {
        let builder = PoolBuilder::new()
            .with_source(StaticSource::new("a", ["1.2.3.4:8080", "9.9.9.9:80"], ProxyType::Http))
            .with_source(StaticSource::new(
                "b",
                ["socks5://1.2.3.4:8080", "9.9.9.9:80:US", "", ":80", "1.1.1.1:x"],
                ProxyType::Http,
            ));

        let build = builder.build().await.unwrap();
        assert_eq!(keys(&build), vec!["1.2.3.4:8080", "9.9.9.9:80"]);
    }

    #[tokio::test]
    async fn test_one_failing_source_is_not_fatal() {
        let builder = PoolBuilder::new()
            .with_source(FailingSource("down"))
            .with_source(StaticSource::new("up", ["1.2.3.4:8080"], ProxyType::Http));

        let build = builder.build().await.unwrap();
        assert_eq!(build.candidates.len(), 1);
        assert!(!build.sources[0].is_success());
        assert!(build.sources[1].is_success());
    }

    #[tokio::test]
    async fn test_all_sources_failing_is_aggregate_error() {
        let builder = PoolBuilder::new()
            .with_source(FailingSource("a"))
            .with_source(FailingSource("b"))
            .with_source(FailingSource("c"));

        match builder.build().await {
            Err(HarvestError::AllSourcesFailed { attempted }) => assert_eq!(attempted, 3),
            other => panic!("expected aggregate failure, got {:?}", other.map(|b| b.candidates)),
        }
    }

    #[tokio::test]
    async fn test_empty_sources_yield_empty_pool() {
        let builder = PoolBuilder::new()
            .with_source(StaticSource::new("a", Vec::<String>::new(), ProxyType::Http))
            .with_source(StaticSource::new("b", Vec::<String>::new(), ProxyType::Http));

        let build = builder.build().await.unwrap();
        assert!(build.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_no_sources_configured() {
        assert!(matches!(PoolBuilder::new().build().await, Err(HarvestError::NoSources)));
    }

    #[tokio::test]
    async fn test_claimed_country_prefilter() {
        let builder = PoolBuilder::new()
            .with_country(Some("us".to_string()))
            .with_source(StaticSource::new(
                "geo",
                ["1.1.1.1:80:US", "2.2.2.2:80:DE", "3.3.3.3:80"],
                ProxyType::Http,
            ));

        let build = builder.build().await.unwrap();
        assert_eq!(keys(&build), vec!["1.1.1.1:80", "3.3.3.3:80"]);
        assert_eq!(build.filtered_by_country, 1);
        assert!(build.candidates[1].claimed_country.is_none());
    }

    #[tokio::test]
    async fn test_three_letter_claim_is_not_filtered() {
        let builder = PoolBuilder::new()
            .with_country(Some("US".to_string()))
            .with_source(StaticSource::new("geo", ["1.1.1.1:80:USA"], ProxyType::Http));

        let build = builder.build().await.unwrap();
        assert_eq!(keys(&build), vec!["1.1.1.1:80"]);
        assert_eq!(build.filtered_by_country, 0);
    }

    #[tokio::test]
    async fn test_max_candidates_cap() {
        let builder = PoolBuilder::new()
            .with_max_candidates(Some(2))
            .with_source(StaticSource::new(
                "list",
                ["1.1.1.1:80", "2.2.2.2:80", "3.3.3.3:80"],
                ProxyType::Http,
            ));

        let build = builder.build().await.unwrap();
        assert_eq!(keys(&build), vec!["1.1.1.1:80", "2.2.2.2:80"]);
    }

    #[test]
    fn test_from_config_uses_configured_sources() {
        let builder = PoolBuilder::from_config(&HarvestConfig::default()).unwrap();
        assert_eq!(builder.sources.len(), 3);
    }
}
