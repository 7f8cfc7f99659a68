//! Proxy module for harvesting and validating proxies
//!
//! This module provides functionality for:
//! - Parsing proxies from various formats (IP:PORT, IP:PORT:CC, scheme://IP:PORT)
//! - Fetching candidate lists from remote and local sources
//! - Validating candidates concurrently, optionally by country
//! - Persisting the accepted subset

pub mod checker;
pub mod crawler;
pub mod geo;
pub mod models;
pub mod parser;
pub mod pool;
pub mod runner;
pub mod sink;

pub use checker::{CheckerConfig, ProxyChecker, Validate};
pub use crawler::{FileSource, HttpSource, RawEntry, SourceFetcher, StaticSource};
pub use geo::{GeoLocation, GeoLocator, GeoResolver, HttpGeoLocator};
pub use models::{GeoStatus, ProxyCandidate, ProxyPool, ProxyType, ValidationResult, Verdict};
pub use parser::ProxyParser;
pub use pool::{PoolBuild, PoolBuilder, SourceReport};
pub use runner::{RunReport, RunnerConfig, ValidationRunner};
