//! Concurrent validation runner
//!
//! Candidates are validated with at most `workers` checks in flight. Results
//! are consumed as they complete; once `target` candidates are accepted no
//! further checks are started and whatever is still in flight is dropped.

use crate::proxy::checker::Validate;
use crate::proxy::models::{ProxyCandidate, ProxyPool, ValidationResult};
use futures::stream::{self, StreamExt};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default number of concurrent checks
const DEFAULT_WORKERS: usize = 10;

/// Default number of accepted proxies to stop at
const DEFAULT_TARGET: usize = 5;

/// Configuration for the runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Maximum number of validations in flight
    pub workers: usize,
    /// Stop once this many candidates are accepted; `None` validates everything
    pub target: Option<usize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            target: Some(DEFAULT_TARGET),
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// A target of zero means "no target"
    pub fn with_target(mut self, target: usize) -> Self {
        self.target = (target > 0).then_some(target);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.target = None;
        self
    }
}

/// Outcome of one runner pass
#[derive(Debug, Default)]
pub struct RunReport {
    /// Accepted candidates in arrival order
    pub pool: ProxyPool,
    /// Every result that was consumed, accepted or not
    pub results: Vec<ValidationResult>,
    /// Candidates handed to the runner
    pub submitted: usize,
    /// The target was reached before the candidates ran out
    pub stopped_early: bool,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn checked(&self) -> usize {
        self.results.len()
    }

    pub fn rejected(&self) -> usize {
        self.results.iter().filter(|r| !r.is_accepted()).count()
    }
}

/// Runs a validator over a candidate sequence with bounded parallelism
pub struct ValidationRunner<V> {
    validator: V,
    config: RunnerConfig,
}

impl<V: Validate> ValidationRunner<V> {
    pub fn new(validator: V, config: RunnerConfig) -> Self {
        Self { validator, config }
    }

    /// Validate `candidates` until the target is met or the input runs out.
    ///
    /// The accepted list is in completion order, not input order.
    pub async fn run(&self, candidates: Vec<ProxyCandidate>) -> RunReport {
        let start = Instant::now();
        let workers = self.config.workers.max(1);
        let submitted = candidates.len();
        let mut report = RunReport {
            submitted,
            ..RunReport::default()
        };

        if self.config.target == Some(0) {
            report.elapsed = start.elapsed();
            return report;
        }

        info!(
            candidates = submitted,
            workers,
            wanted = ?self.config.target,
            "validating candidates"
        );

        // buffer_unordered only pulls a new candidate when a slot frees up, so
        // breaking out of the loop stops dispatch; dropping the stream drops
        // whatever was still in flight.
        let validator = &self.validator;
        let mut checks = stream::iter(candidates)
            .map(|candidate| async move { validator.validate(&candidate).await })
            .buffer_unordered(workers);

        while let Some(result) = checks.next().await {
            if result.is_accepted() {
                if report.pool.push(result.candidate.clone()) {
                    info!(
                        proxy = %result.candidate,
                        origin = result.observed_origin_ip.as_deref().unwrap_or("-"),
                        country = result.resolved_country.as_deref().unwrap_or("-"),
                        elapsed_ms = result.elapsed_ms(),
                        "accepted proxy"
                    );
                }
            } else {
                debug!(proxy = %result.candidate, "rejected: {:?}", result.verdict);
            }
            report.results.push(result);

            if let Some(target) = self.config.target {
                if report.pool.len() >= target {
                    report.stopped_early = report.results.len() < submitted;
                    break;
                }
            }
        }

        report.elapsed = start.elapsed();
        info!(
            accepted = report.pool.len(),
            checked = report.checked(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "validation finished"
        );
        report
    }
}
