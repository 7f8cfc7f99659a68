//! Error taxonomy for harvesting runs

use std::path::PathBuf;

/// Errors that can occur while building, validating or persisting a pool.
///
/// Candidates that fail validation are not errors; they are reported as a
/// [`Verdict`](crate::proxy::Verdict) on their `ValidationResult`.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("source {source_name} failed: {reason}")]
    Source { source_name: String, reason: String },
    #[error("all {attempted} proxy sources failed")]
    AllSourcesFailed { attempted: usize },
    #[error("no proxy sources configured")]
    NoSources,
    #[error("failed to write {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid proxy entry: {0:?}")]
    InvalidEntry(String),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl HarvestError {
    pub fn source_failed(name: &str, reason: impl ToString) -> Self {
        HarvestError::Source {
            source_name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}
