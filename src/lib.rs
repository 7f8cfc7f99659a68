//! Proxy Harvest - fetch, validate and keep working proxies
//!
//! Candidate proxies are pulled from public list sources, checked
//! concurrently against an IP echo endpoint (and optionally a country
//! filter), and the working subset is written to a newline-delimited file.

pub mod config;
pub mod error;
pub mod harvest;
pub mod proxy;

pub use crate::config::HarvestConfig;
pub use crate::error::HarvestError;
pub use crate::harvest::{harvest, HarvestOutcome};
pub use crate::proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
