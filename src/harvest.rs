//! One end-to-end run: build the candidate pool, validate it, persist the result

use crate::config::HarvestConfig;
use crate::proxy::checker::{CheckerConfig, ProxyChecker};
use crate::proxy::pool::{PoolBuild, PoolBuilder};
use crate::proxy::runner::{RunReport, RunnerConfig, ValidationRunner};
use crate::proxy::sink::{self, RunSummary};
use crate::Result;
use chrono::Utc;
use std::path::PathBuf;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// What a finished run produced
#[derive(Debug)]
pub struct HarvestOutcome {
    pub run_id: Uuid,
    pub build: PoolBuild,
    pub report: RunReport,
    /// Where the artifact went, if it was written
    pub written: Option<PathBuf>,
}

impl HarvestOutcome {
    /// No candidate was accepted
    pub fn is_empty(&self) -> bool {
        self.report.pool.is_empty()
    }
}

/// Run the full pipeline.
///
/// An empty result is only written when `allow_empty` is set, so a failed run
/// does not clobber a previous artifact. Source failures are fatal only when
/// every source fails; a write failure is always fatal.
pub async fn harvest(
    config: &HarvestConfig,
    builder: PoolBuilder,
    allow_empty: bool,
    report_path: Option<PathBuf>,
) -> Result<HarvestOutcome> {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("harvest", %run_id);

    async move {
        let started_at = Utc::now();
        let build = builder.build().await?;

        let checker = ProxyChecker::with_config(CheckerConfig::from_harvest(config))?;
        let runner = ValidationRunner::new(
            checker,
            RunnerConfig::new()
                .with_workers(config.workers)
                .with_target(config.max_proxies),
        );
        let report = runner.run(build.candidates.clone()).await;

        let written = if report.pool.is_empty() && !allow_empty {
            warn!("no proxies accepted, leaving {} untouched", config.output.display());
            None
        } else {
            let count = sink::write_pool(&report.pool, &config.output)?;
            info!(count, path = %config.output.display(), "saved proxies");
            Some(config.output.clone())
        };

        if let Some(path) = report_path {
            sink::write_report(&RunSummary::new(run_id, started_at, &report), &path)?;
            info!(path = %path.display(), "wrote run report");
        }

        Ok(HarvestOutcome {
            run_id,
            build,
            report,
            written,
        })
    }
    .instrument(span)
    .await
}
