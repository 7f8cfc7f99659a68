//! Result sink: the newline-delimited proxy artifact and the JSON run report

use crate::error::HarvestError;
use crate::proxy::models::{ProxyCandidate, ProxyPool, ProxyType, ValidationResult};
use crate::proxy::parser::ProxyParser;
use crate::proxy::runner::RunReport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use uuid::Uuid;

/// Write the pool to `path`, one entry per line, replacing any previous file.
///
/// An empty pool produces an empty file. Returns the number of entries written.
pub fn write_pool<P: AsRef<Path>>(pool: &ProxyPool, path: P) -> Result<usize, HarvestError> {
    let path = path.as_ref();
    let content: String = pool.iter().map(|p| format!("{}\n", p.to_entry())).collect();

    write_atomically(path, content.as_bytes()).map_err(|source| HarvestError::Persist {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(pool.len())
}

/// Read an artifact written by [`write_pool`]
pub fn read_pool<P: AsRef<Path>>(path: P) -> Result<ProxyPool, HarvestError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| HarvestError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(ProxyParser::parse_string(&content, ProxyType::Http)
        .into_iter()
        .collect())
}

/// Append a manually found proxy to the artifact.
///
/// Returns `Ok(false)` if the `host:port` is already listed.
pub fn append_entry<P: AsRef<Path>>(path: P, entry: &str) -> Result<bool, HarvestError> {
    let path = path.as_ref();
    let candidate = ProxyParser::parse_line(entry, ProxyType::Http)
        .ok_or_else(|| HarvestError::InvalidEntry(entry.to_string()))?;

    let existing = if path.exists() {
        read_pool(path)?
    } else {
        ProxyPool::new()
    };
    if existing.contains(&candidate) {
        return Ok(false);
    }

    let persist = |source| HarvestError::Persist {
        path: path.to_path_buf(),
        source,
    };
    let needs_newline = fs::read(path)
        .map(|bytes| bytes.last().is_some_and(|b| *b != b'\n'))
        .unwrap_or(false);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(persist)?;
    if needs_newline {
        writeln!(file).map_err(persist)?;
    }
    writeln!(file, "{}", candidate.to_entry()).map_err(persist)?;
    Ok(true)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Machine readable summary of one run
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub submitted: usize,
    pub checked: usize,
    pub accepted: usize,
    pub stopped_early: bool,
    pub proxies: Vec<&'a ProxyCandidate>,
    pub results: &'a [ValidationResult],
}

impl<'a> RunSummary<'a> {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>, report: &'a RunReport) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            submitted: report.submitted,
            checked: report.checked(),
            accepted: report.pool.len(),
            stopped_early: report.stopped_early,
            proxies: report.pool.iter().collect(),
            results: &report.results,
        }
    }
}

/// Write the JSON run report
pub fn write_report<P: AsRef<Path>>(summary: &RunSummary<'_>, path: P) -> Result<(), HarvestError> {
    let path = path.as_ref();
    let json = serde_json::to_vec_pretty(summary).map_err(|e| HarvestError::Persist {
        path: path.to_path_buf(),
        source: io::Error::other(e),
    })?;
    write_atomically(path, &json).map_err(|source| HarvestError::Persist {
        path: path.to_path_buf(),
        source,
    })
}
